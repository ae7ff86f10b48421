use std::fmt;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use vaio_core::Stage;

/// A timed piece of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    /// Language reported by the transcriber, when it reports one.
    pub language: Option<String>,
}

/// Audio extraction and speech-to-text.
pub trait MediaTools: Send + Sync {
    fn extract_audio(&self, video: &Path, audio: &Path) -> Result<()>;

    fn transcribe(&self, audio: &Path, language_hint: &str) -> Result<Transcript>;
}

/// Text-to-speech for one language.
pub trait Narrator: Send + Sync {
    /// Fails when the narration backend itself is unusable.
    fn ensure_available(&self) -> vaio_core::Result<()> {
        Ok(())
    }

    fn supports(&self, _lang: &str) -> bool {
        true
    }

    fn narrate(&self, text: &str, lang: &str, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    CaptionsReview,
    DescriptionReview,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::CaptionsReview => "captions_review",
            Checkpoint::DescriptionReview => "description_review",
        }
    }

    /// Stage the asset sits at while this checkpoint is pending.
    pub fn pending_stage(&self) -> Stage {
        match self {
            Checkpoint::CaptionsReview => Stage::CaptionsDone,
            Checkpoint::DescriptionReview => Stage::CaptionsVerified,
        }
    }

    pub fn approved_stage(&self) -> Stage {
        match self {
            Checkpoint::CaptionsReview => Stage::CaptionsVerified,
            Checkpoint::DescriptionReview => Stage::DescriptionDone,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    /// No answer available now; ask again on the next run.
    Deferred,
}

pub trait Approver: Send + Sync {
    fn review(&self, checkpoint: Checkpoint, artifact: &Path) -> Decision;
}

/// Approves everything (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Approver for AutoApprove {
    fn review(&self, _checkpoint: Checkpoint, _artifact: &Path) -> Decision {
        Decision::Approved
    }
}

/// Never answers (`--no-input`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferApproval;

impl Approver for DeferApproval {
    fn review(&self, _checkpoint: Checkpoint, _artifact: &Path) -> Decision {
        Decision::Deferred
    }
}
