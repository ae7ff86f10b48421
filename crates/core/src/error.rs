use std::path::PathBuf;

use thiserror::Error;

use crate::stage::Stage;

#[derive(Error, Debug)]
pub enum VaioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("missing required artifact: {0:?}")]
    MissingArtifact(PathBuf),
    #[error("refusing to move stage backwards from {from} to {to}")]
    StageRegression { from: Stage, to: Stage },
    #[error("stage {requested} requires {required}, asset is at {current}")]
    StageOrder {
        requested: Stage,
        required: Stage,
        current: Stage,
    },
    #[error(
        "asset is locked by another run{}; if no run is active, remove {} or run `vaio unlock`",
        .holder.map(|pid| format!(" (pid {pid})")).unwrap_or_default(),
        .path.display()
    )]
    AssetLocked { path: PathBuf, holder: Option<u32> },
    #[error("config error: {0}")]
    Config(String),
    #[error("generation failed after {attempts} attempts: {message}")]
    Generation { attempts: u32, message: String },
    #[error("collection {collection} was built with {built_with}, current provider is {current}")]
    EmbeddingProviderMismatch {
        collection: String,
        built_with: String,
        current: String,
    },
    #[error("knowledge index error: {0}")]
    Index(String),
    #[error("missing dependency: {0}")]
    Dependency(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VaioError>;

impl From<anyhow::Error> for VaioError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(format!("{value:#}"))
    }
}

impl VaioError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
