mod config;
mod error;
mod fanout;
mod knowledge;
mod layout;
mod metadata;
mod stage;

pub use config::{Language, VaioConfig, DEFAULT_CONFIG_FILE, DEFAULT_CONTEXT_THRESHOLD};
pub use error::{Result, VaioError};
pub use fanout::{FanOut, LanguageTask};
pub use knowledge::{sanitize_collection_name, KbLocation, KbRoots, KnowledgeRef};
pub use layout::{ensure_dir, read_text, write_text, AssetLayout, TEMPLATE_FILENAME};
pub use metadata::{AssetLock, AssetMetadata, MetadataStore};
pub use stage::{Stage, ALL_STAGES};
