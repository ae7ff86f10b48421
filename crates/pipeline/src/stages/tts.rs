use anyhow::{bail, Context};
use tracing::info;

use vaio_core::{ensure_dir, read_text, AssetMetadata, LanguageTask, Result, Stage};

use super::translate::log_summary;
use super::{StageContext, StageOutcome, TTS};
use crate::srt::spoken_text;

/// `captions_translated → tts_done`: one narration per caption language.
pub fn narrate(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    ctx.narrator.ensure_available()?;
    let (source_lang, source_captions) = ctx.source_captions(meta);

    let mut tasks: Vec<LanguageTask> = Vec::new();
    if !ctx.config.target_languages.iter().any(|l| l.code == source_lang.code) {
        tasks.push(LanguageTask {
            output: ctx.layout.tts_path(&source_lang.code),
            language: source_lang.clone(),
        });
    }
    tasks.extend(ctx.config.target_languages.iter().map(|lang| LanguageTask {
        language: lang.clone(),
        output: ctx.layout.tts_path(&lang.code),
    }));

    ensure_dir(&ctx.layout.tts_dir())?;
    info!(languages = tasks.len(), "narrating captions");
    let results = ctx.fanout().run_languages(&tasks, |task| {
        let code = task.language.code.as_str();
        if !ctx.narrator.supports(code) {
            bail!("no narration voice for {code}");
        }
        let captions = if code == source_lang.code {
            source_captions.clone()
        } else {
            ctx.layout.caption_path(code)
        };
        let srt = read_text(&captions).with_context(|| format!("reading {}", captions.display()))?;
        let text = spoken_text(&srt);
        if text.is_empty() {
            bail!("no spoken text in {}", captions.display());
        }
        ctx.narrator.narrate(&text, code, &task.output)?;
        if !task.output.is_file() {
            bail!("narrator produced no file at {}", task.output.display());
        }
        Ok(())
    })?;
    log_summary("narration", &results);

    meta.set_artifact(TTS, &results)?;
    meta.advance(Stage::TtsDone)?;
    Ok(StageOutcome::Advanced(Stage::TtsDone))
}
