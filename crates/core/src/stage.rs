use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Linear pipeline position persisted per asset.
///
/// Declaration order is pipeline order; `Ord` follows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    #[serde(alias = "audio_pending")]
    Init,
    AudioDone,
    CaptionsDone,
    CaptionsVerified,
    DescriptionDone,
    Translated,
    CaptionsTranslated,
    TtsDone,
}

pub const ALL_STAGES: [Stage; 8] = [
    Stage::Init,
    Stage::AudioDone,
    Stage::CaptionsDone,
    Stage::CaptionsVerified,
    Stage::DescriptionDone,
    Stage::Translated,
    Stage::CaptionsTranslated,
    Stage::TtsDone,
];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::AudioDone => "audio_done",
            Stage::CaptionsDone => "captions_done",
            Stage::CaptionsVerified => "captions_verified",
            Stage::DescriptionDone => "description_done",
            Stage::Translated => "translated",
            Stage::CaptionsTranslated => "captions_translated",
            Stage::TtsDone => "tts_done",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        let idx = ALL_STAGES.iter().position(|s| s == self)?;
        ALL_STAGES.get(idx + 1).copied()
    }

    pub fn previous(&self) -> Option<Stage> {
        let idx = ALL_STAGES.iter().position(|s| s == self)?;
        idx.checked_sub(1).map(|i| ALL_STAGES[i])
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if normalized == "audio_pending" {
            return Ok(Stage::Init);
        }
        ALL_STAGES
            .iter()
            .find(|stage| stage.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown stage {value}"))
    }
}
