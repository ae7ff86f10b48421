use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::bail;
use tracing::info;

use vaio_core::{read_text, write_text, AssetMetadata, LanguageTask, Result, Stage};
use vaio_rag::Task;

use super::{
    existing_draft, StageContext, StageOutcome, CAPTION_SOURCE_LANG, CAPTION_TRANSLATIONS, TD_LANG,
    TRANSLATED_FROM, TRANSLATIONS,
};
use crate::prompts;
use crate::srt::clean_srt;

/// One task per configured target, skipping the language the source is already in.
pub(crate) fn target_tasks<F>(ctx: &StageContext<'_>, source_code: &str, output: F) -> Vec<LanguageTask>
where
    F: Fn(&str) -> PathBuf,
{
    ctx.config
        .target_languages
        .iter()
        .filter(|lang| lang.code != source_code)
        .map(|lang| LanguageTask {
            language: lang.clone(),
            output: output(&lang.code),
        })
        .collect()
}

pub(crate) fn log_summary(what: &str, results: &BTreeMap<String, bool>) {
    let ok = results.values().filter(|ok| **ok).count();
    let failed: Vec<&str> = results
        .iter()
        .filter(|(_, ok)| !**ok)
        .map(|(code, _)| code.as_str())
        .collect();
    info!(
        what,
        succeeded = ok,
        total = results.len(),
        failed = %failed.join(","),
        "fan-out finished"
    );
}

/// `description_done → translated`
pub fn translate_description(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    let Some(source) = existing_draft(ctx.layout, meta) else {
        return Ok(StageOutcome::Aborted(
            "no title/description found; run the desc stage first".into(),
        ));
    };
    let source_code = meta
        .artifact_str(TD_LANG)
        .unwrap_or(ctx.config.source_language.code.as_str())
        .to_string();
    let source_lang = ctx.language(&source_code);
    let content = read_text(&source)?;

    let tasks = target_tasks(ctx, &source_code, |code| ctx.layout.td_path(code));
    info!(from = %source_code, targets = tasks.len(), "translating title/description");
    let results = ctx.fanout().run_languages(&tasks, |task| {
        let user = prompts::translate_td_user(&source_lang.name, &task.language.name, &content);
        let translated = ctx.generator.call_with_retry(prompts::SYSTEM_TRANSLATE_TD, &user)?;
        if translated.trim().is_empty() {
            bail!("empty model response");
        }
        write_text(&task.output, &translated)?;
        Ok(())
    })?;
    log_summary("title/description", &results);

    meta.set_artifact(TRANSLATIONS, &results)?;
    meta.set_artifact(TRANSLATED_FROM, &source_code)?;
    meta.advance(Stage::Translated)?;
    Ok(StageOutcome::Advanced(Stage::Translated))
}

/// `translated → captions_translated`
pub fn translate_captions(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    let (source_lang, source) = ctx.source_captions(meta);
    if !source.is_file() {
        return Ok(StageOutcome::Aborted(format!(
            "no captions found at {}",
            source.display()
        )));
    }
    let content = clean_srt(&read_text(&source)?);
    if content.is_empty() {
        return Ok(StageOutcome::Aborted(format!("captions are empty: {}", source.display())));
    }

    let identity = meta.knowledge_ref();
    ctx.injector.prepare(&identity);

    let tasks = target_tasks(ctx, &source_lang.code, |code| ctx.layout.caption_path(code));
    info!(from = %source_lang.code, targets = tasks.len(), "translating captions");
    let results = ctx.fanout().run_languages(&tasks, |task| {
        let user = prompts::translate_captions_user(&source_lang.name, &task.language.name, &content);
        let user = ctx.injector.inject(&identity, Task::Translate, &user);
        let translated = ctx
            .generator
            .call_with_retry(prompts::SYSTEM_TRANSLATE_CAPTIONS, &user)?;
        let translated = clean_srt(&translated);
        if translated.is_empty() {
            bail!("empty model response");
        }
        write_text(&task.output, &translated)?;
        Ok(())
    })?;
    log_summary("captions", &results);

    meta.set_artifact(CAPTION_TRANSLATIONS, &results)?;
    meta.set_artifact(CAPTION_SOURCE_LANG, &source_lang.code)?;
    meta.advance(Stage::CaptionsTranslated)?;
    Ok(StageOutcome::Advanced(Stage::CaptionsTranslated))
}
