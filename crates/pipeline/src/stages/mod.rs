//! Work performed to move an asset from one stage to the next.

use std::path::{Path, PathBuf};

use vaio_core::{AssetLayout, AssetMetadata, FanOut, Language, Result, Stage, VaioConfig};
use vaio_llm::ResilientClient;
use vaio_rag::ContextInjector;

use crate::tools::{Approver, Checkpoint, MediaTools, Narrator};

pub mod audio;
pub mod captions;
pub mod description;
pub mod translate;
pub mod tts;

pub const AUDIO_FILE: &str = "audio_file";
pub const CAPTION_LANG: &str = "caption_lang";
pub const CAPTION_FILE: &str = "caption_file";
pub const DETECTED_LANGUAGE: &str = "detected_language";
pub const VERIFIED_CAPTION_LENGTH: &str = "verified_caption_length";
pub const TD_FILE: &str = "td_file";
pub const TD_LANG: &str = "td_lang";
pub const TRANSLATIONS: &str = "translations";
pub const TRANSLATED_FROM: &str = "translated_from";
pub const CAPTION_TRANSLATIONS: &str = "caption_translations";
pub const CAPTION_SOURCE_LANG: &str = "caption_source_lang";
pub const TTS: &str = "tts";

/// Stage whose completion owns each artifact key.
const ARTIFACT_OWNERS: [(&str, Stage); 12] = [
    (AUDIO_FILE, Stage::AudioDone),
    (CAPTION_LANG, Stage::CaptionsDone),
    (CAPTION_FILE, Stage::CaptionsDone),
    (DETECTED_LANGUAGE, Stage::CaptionsDone),
    (VERIFIED_CAPTION_LENGTH, Stage::CaptionsVerified),
    (TD_FILE, Stage::DescriptionDone),
    (TD_LANG, Stage::DescriptionDone),
    (TRANSLATIONS, Stage::Translated),
    (TRANSLATED_FROM, Stage::Translated),
    (CAPTION_TRANSLATIONS, Stage::CaptionsTranslated),
    (CAPTION_SOURCE_LANG, Stage::CaptionsTranslated),
    (TTS, Stage::TtsDone),
];

/// Keys produced by stages later than `stage`.
pub fn artifacts_after(stage: Stage) -> Vec<&'static str> {
    ARTIFACT_OWNERS
        .iter()
        .filter(|(_, owner)| *owner > stage)
        .map(|(key, _)| *key)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Advanced(Stage),
    AwaitingApproval(Checkpoint),
    /// Inputs are missing or unusable; nothing was persisted.
    Aborted(String),
}

/// Everything a stage may touch besides the metadata record.
pub struct StageContext<'a> {
    pub config: &'a VaioConfig,
    pub layout: &'a AssetLayout,
    pub generator: &'a ResilientClient,
    pub injector: &'a ContextInjector,
    pub media: &'a dyn MediaTools,
    pub narrator: &'a dyn Narrator,
    pub approver: &'a dyn Approver,
    pub template: Option<&'a Path>,
}

impl StageContext<'_> {
    pub fn fanout(&self) -> FanOut {
        FanOut::new(self.config.concurrency)
    }

    pub fn source_captions(&self, meta: &AssetMetadata) -> (Language, PathBuf) {
        source_captions(self.config, self.layout, meta)
    }

    pub fn language(&self, code: &str) -> Language {
        language_for(self.config, code)
    }
}

/// Source-language captions: the tagged file when recorded, else the configured source code.
pub fn source_captions(config: &VaioConfig, layout: &AssetLayout, meta: &AssetMetadata) -> (Language, PathBuf) {
    let code = meta
        .artifact_str(CAPTION_LANG)
        .unwrap_or(config.source_language.code.as_str())
        .to_string();
    let path = match meta.artifact_str(CAPTION_FILE) {
        Some(name) => layout.captions_dir().join(name),
        None => layout.caption_path(&code),
    };
    (language_for(config, &code), path)
}

/// The recorded title/description draft, if its file is still on disk.
pub fn existing_draft(layout: &AssetLayout, meta: &AssetMetadata) -> Option<PathBuf> {
    let path = layout.description_dir().join(meta.artifact_str(TD_FILE)?);
    path.is_file().then_some(path)
}

/// Configured display name for a code, registry name otherwise.
pub fn language_for(config: &VaioConfig, code: &str) -> Language {
    if code == config.source_language.code {
        return config.source_language.clone();
    }
    config
        .target_languages
        .iter()
        .find(|lang| lang.code == code)
        .cloned()
        .unwrap_or_else(|| Language::from_code(code))
}

/// Runs the work that leads out of the asset's current stage.
pub fn run(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    match meta.stage {
        Stage::Init => audio::extract(ctx, meta),
        Stage::AudioDone => captions::transcribe(ctx, meta),
        Stage::CaptionsDone => captions::verify(ctx, meta),
        Stage::CaptionsVerified => description::generate(ctx, meta),
        Stage::DescriptionDone => translate::translate_description(ctx, meta),
        Stage::Translated => translate::translate_captions(ctx, meta),
        Stage::CaptionsTranslated => tts::narrate(ctx, meta),
        Stage::TtsDone => Ok(StageOutcome::Advanced(Stage::TtsDone)),
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
