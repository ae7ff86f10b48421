use tracing::info;

use vaio_core::{AssetMetadata, Result, Stage, VaioError};

use super::{file_name, StageContext, StageOutcome, AUDIO_FILE};

/// `init → audio_done`: the soundtrack lands beside the video as `<stem>.mp3`.
pub fn extract(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    let video = ctx.layout.video();
    if !video.is_file() {
        return Ok(StageOutcome::Aborted(format!("video not found: {}", video.display())));
    }
    let audio = ctx.layout.audio_path();
    info!(video = %video.display(), audio = %audio.display(), "extracting audio");
    ctx.media
        .extract_audio(video, &audio)
        .map_err(|err| VaioError::Other(format!("audio extraction failed: {err:#}")))?;
    if !audio.is_file() {
        return Err(VaioError::MissingArtifact(audio));
    }
    meta.set_artifact(AUDIO_FILE, file_name(&audio))?;
    meta.advance(Stage::AudioDone)?;
    Ok(StageOutcome::Advanced(Stage::AudioDone))
}
