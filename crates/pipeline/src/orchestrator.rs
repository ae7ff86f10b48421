use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use vaio_core::{
    AssetLayout, AssetMetadata, KnowledgeRef, MetadataStore, Result, Stage, VaioConfig, VaioError,
};
use vaio_llm::{LlmClient, ResilientClient, RetryPolicy};
use vaio_rag::{ContextInjector, EmbeddingClient, InjectionSettings, Retriever};

use crate::stages::{self, captions, description, StageContext, StageOutcome};
use crate::tools::{Approver, Checkpoint, MediaTools, Narrator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    /// The asset is at the terminal stage.
    Complete,
    /// One stage ran; more remain.
    Stepped,
    /// The requested stage had already been completed.
    AlreadyDone,
    AwaitingApproval(Checkpoint),
    Aborted(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub asset: PathBuf,
    pub from: Stage,
    pub stage: Stage,
    #[serde(flatten)]
    pub status: RunStatus,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, RunStatus::Aborted(_))
    }
}

/// Drives assets through the stage machine, one stage at a time or until a checkpoint.
pub struct Orchestrator {
    config: VaioConfig,
    generator: Arc<ResilientClient>,
    injector: ContextInjector,
    media: Arc<dyn MediaTools>,
    narrator: Arc<dyn Narrator>,
    approver: Arc<dyn Approver>,
    template: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        config: VaioConfig,
        generator: Arc<ResilientClient>,
        injector: ContextInjector,
        media: Arc<dyn MediaTools>,
        narrator: Arc<dyn Narrator>,
        approver: Arc<dyn Approver>,
    ) -> Self {
        Self {
            config,
            generator,
            injector,
            media,
            narrator,
            approver,
            template: None,
        }
    }

    /// Wires the configured generation backend and knowledge retriever.
    pub fn from_config(
        config: VaioConfig,
        media: Arc<dyn MediaTools>,
        narrator: Arc<dyn Narrator>,
        approver: Arc<dyn Approver>,
    ) -> Result<Self> {
        let llm = LlmClient::from_config(&config)?;
        let generator = ResilientClient::new(Arc::new(llm), RetryPolicy::from_config(&config));
        let embedder = EmbeddingClient::from_config(&config)?;
        let retriever = Retriever::new(config.kb_roots(), Arc::new(embedder), config.chunk_chars);
        let injector = ContextInjector::new(Arc::new(retriever), InjectionSettings::from_config(&config));
        Ok(Self::new(config, Arc::new(generator), injector, media, narrator, approver))
    }

    pub fn with_template(mut self, template: Option<PathBuf>) -> Self {
        self.template = template;
        self
    }

    /// Runs stages from the persisted one until a checkpoint, an abort or completion.
    pub fn resume(&self, asset: &Path) -> Result<RunReport> {
        let store = MetadataStore::for_asset(asset);
        let _lock = store.lock()?;
        let mut meta = store.load();
        let from = meta.stage;
        let layout = AssetLayout::new(asset);
        let ctx = self.context(&layout);

        let status = loop {
            if meta.stage.is_terminal() {
                info!(asset = %asset.display(), "asset complete");
                break RunStatus::Complete;
            }
            match self.step(&ctx, &store, &mut meta)? {
                StageOutcome::Advanced(_) => continue,
                StageOutcome::AwaitingApproval(checkpoint) => break RunStatus::AwaitingApproval(checkpoint),
                StageOutcome::Aborted(reason) => break RunStatus::Aborted(reason),
            }
        };
        Ok(RunReport {
            asset: asset.to_path_buf(),
            from,
            stage: meta.stage,
            status,
        })
    }

    /// Runs the single stage that produces `target`; its predecessor must be current.
    pub fn run_stage(&self, asset: &Path, target: Stage) -> Result<RunReport> {
        let Some(required) = target.previous() else {
            return Err(VaioError::Other(format!("{target} is not produced by any stage")));
        };
        let store = MetadataStore::for_asset(asset);
        let _lock = store.lock()?;
        let mut meta = store.load();
        let from = meta.stage;

        let status = if meta.stage >= target {
            info!(stage = %target, current = %meta.stage, "stage already completed; reset to run it again");
            RunStatus::AlreadyDone
        } else if meta.stage != required {
            return Err(VaioError::StageOrder {
                requested: target,
                required,
                current: meta.stage,
            });
        } else {
            let layout = AssetLayout::new(asset);
            let ctx = self.context(&layout);
            match self.step(&ctx, &store, &mut meta)? {
                StageOutcome::Advanced(stage) if stage.is_terminal() => RunStatus::Complete,
                StageOutcome::Advanced(_) => RunStatus::Stepped,
                StageOutcome::AwaitingApproval(checkpoint) => RunStatus::AwaitingApproval(checkpoint),
                StageOutcome::Aborted(reason) => RunStatus::Aborted(reason),
            }
        };
        Ok(RunReport {
            asset: asset.to_path_buf(),
            from,
            stage: meta.stage,
            status,
        })
    }

    /// Confirms the checkpoint pending at the current stage without prompting.
    pub fn approve(&self, asset: &Path) -> Result<Checkpoint> {
        approve(&self.config, asset)
    }

    /// Moves the asset back to `stage`, dropping artifacts recorded by later stages.
    pub fn reset(&self, asset: &Path, stage: Stage) -> Result<AssetMetadata> {
        reset(asset, stage)
    }

    fn context<'a>(&'a self, layout: &'a AssetLayout) -> StageContext<'a> {
        StageContext {
            config: &self.config,
            layout,
            generator: &self.generator,
            injector: &self.injector,
            media: self.media.as_ref(),
            narrator: self.narrator.as_ref(),
            approver: self.approver.as_ref(),
            template: self.template.as_deref(),
        }
    }

    /// Runs one stage on a working copy; the record is saved only when the stage produced state.
    fn step(&self, ctx: &StageContext<'_>, store: &MetadataStore, meta: &mut AssetMetadata) -> Result<StageOutcome> {
        let mut working = meta.clone();
        let before = working.stage;
        let outcome = stages::run(ctx, &mut working)?;
        match &outcome {
            StageOutcome::Advanced(stage) => {
                store.save(&mut working)?;
                *meta = working;
                info!(from = %before, to = %stage, "stage complete");
            }
            StageOutcome::AwaitingApproval(checkpoint) => {
                if working != *meta {
                    store.save(&mut working)?;
                    *meta = working;
                }
                info!(stage = %before, checkpoint = %checkpoint, "halted at checkpoint");
            }
            StageOutcome::Aborted(reason) => {
                warn!(stage = %before, reason = %reason, "stage aborted");
            }
        }
        Ok(outcome)
    }
}

/// Records which knowledge base the asset uses.
pub fn set_knowledge(asset: &Path, identity: &KnowledgeRef) -> Result<AssetMetadata> {
    let store = MetadataStore::for_asset(asset);
    let _lock = store.lock()?;
    let mut meta = store.load();
    meta.set_knowledge(identity);
    store.save(&mut meta)?;
    info!(asset = %asset.display(), knowledge = %identity, "knowledge setting updated");
    Ok(meta)
}

/// Confirms the checkpoint pending at the current stage without prompting.
pub fn approve(config: &VaioConfig, asset: &Path) -> Result<Checkpoint> {
    let store = MetadataStore::for_asset(asset);
    let _lock = store.lock()?;
    let mut meta = store.load();
    let layout = AssetLayout::new(asset);

    let checkpoint = match meta.stage {
        Stage::CaptionsDone => {
            let (_, path) = stages::source_captions(config, &layout, &meta);
            if !path.is_file() {
                return Err(VaioError::MissingArtifact(path));
            }
            captions::accept(&mut meta, &path)?;
            Checkpoint::CaptionsReview
        }
        Stage::CaptionsVerified => {
            if stages::existing_draft(&layout, &meta).is_none() {
                return Err(VaioError::MissingArtifact(
                    layout.td_path(&config.source_language.code),
                ));
            }
            description::accept(&mut meta)?;
            Checkpoint::DescriptionReview
        }
        other => {
            return Err(VaioError::Other(format!("no checkpoint pending at stage {other}")));
        }
    };
    store.save(&mut meta)?;
    info!(asset = %asset.display(), checkpoint = %checkpoint, stage = %meta.stage, "checkpoint approved");
    Ok(checkpoint)
}

/// Moves the asset back to `stage`, dropping artifacts recorded by later stages.
pub fn reset(asset: &Path, stage: Stage) -> Result<AssetMetadata> {
    let store = MetadataStore::for_asset(asset);
    let _lock = store.lock()?;
    let mut meta = store.load();
    let previous = meta.stage;
    for key in stages::artifacts_after(stage) {
        meta.remove_artifact(key);
    }
    meta.reset(stage);
    store.save(&mut meta)?;
    info!(asset = %asset.display(), from = %previous, to = %stage, "stage reset");
    Ok(meta)
}
