use std::path::Path;

use tracing::{info, warn};

use vaio_core::{read_text, write_text, AssetMetadata, Result, Stage, VaioError};

use super::{
    file_name, StageContext, StageOutcome, AUDIO_FILE, CAPTION_FILE, CAPTION_LANG, DETECTED_LANGUAGE,
    VERIFIED_CAPTION_LENGTH,
};
use crate::srt::segments_to_srt;
use crate::tools::{Checkpoint, Decision};

/// `audio_done → captions_done`
pub fn transcribe(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    let audio = meta
        .artifact_str(AUDIO_FILE)
        .map(|name| ctx.layout.dir().join(name))
        .unwrap_or_else(|| ctx.layout.audio_path());
    if !audio.is_file() {
        return Ok(StageOutcome::Aborted(format!(
            "audio not found: {}; run the audio stage first",
            audio.display()
        )));
    }

    let hint = ctx.config.source_language.code.as_str();
    info!(audio = %audio.display(), model = %ctx.config.whisper_model, "transcribing");
    let transcript = ctx
        .media
        .transcribe(&audio, hint)
        .map_err(|err| VaioError::Other(format!("transcription failed: {err:#}")))?;
    let srt = segments_to_srt(&transcript.segments);
    if srt.trim().is_empty() {
        return Ok(StageOutcome::Aborted("transcription produced no usable captions".into()));
    }

    let detected = transcript
        .language
        .as_deref()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty());
    let lang = detected.clone().unwrap_or_else(|| hint.to_string());
    let path = ctx.layout.caption_path(&lang);
    write_text(&path, &srt)?;
    info!(path = %path.display(), lang = %lang, "captions written");

    meta.set_artifact(CAPTION_LANG, &lang)?;
    meta.set_artifact(CAPTION_FILE, file_name(&path))?;
    meta.set_artifact(DETECTED_LANGUAGE, detected.as_deref().unwrap_or("unknown"))?;
    meta.advance(Stage::CaptionsDone)?;
    Ok(StageOutcome::Advanced(Stage::CaptionsDone))
}

/// `captions_done → captions_verified`, a manual checkpoint.
pub fn verify(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    let (_, path) = ctx.source_captions(meta);
    if !path.is_file() {
        return Ok(StageOutcome::Aborted(format!(
            "no captions found at {}; run the captions stage first",
            path.display()
        )));
    }
    match ctx.approver.review(Checkpoint::CaptionsReview, &path) {
        Decision::Approved => {
            accept(meta, &path)?;
            Ok(StageOutcome::Advanced(Stage::CaptionsVerified))
        }
        Decision::Rejected => {
            warn!(path = %path.display(), "captions rejected; edit the file and resume");
            Ok(StageOutcome::AwaitingApproval(Checkpoint::CaptionsReview))
        }
        Decision::Deferred => {
            info!(path = %path.display(), "captions awaiting approval");
            Ok(StageOutcome::AwaitingApproval(Checkpoint::CaptionsReview))
        }
    }
}

/// Records the approved captions and advances past the checkpoint.
pub fn accept(meta: &mut AssetMetadata, captions: &Path) -> Result<()> {
    let text = read_text(captions)?;
    meta.set_artifact(VERIFIED_CAPTION_LENGTH, text.lines().count())?;
    meta.advance(Stage::CaptionsVerified)?;
    info!(path = %captions.display(), "captions confirmed");
    Ok(())
}
