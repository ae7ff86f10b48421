use std::path::PathBuf;

use tracing::{info, warn};

use vaio_core::{read_text, write_text, AssetMetadata, Result, Stage};
use vaio_rag::Task;

use super::{existing_draft, file_name, StageContext, StageOutcome, TD_FILE, TD_LANG};
use crate::prompts;
use crate::template::{locate_template, ParsedTemplate, DEFAULT_TEMPLATE};
use crate::tools::{Checkpoint, Decision};

/// `captions_verified → description_done`: draft once, then wait for confirmation.
pub fn generate(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<StageOutcome> {
    let draft = match existing_draft(ctx.layout, meta) {
        Some(path) => {
            info!(path = %path.display(), "reusing existing title/description draft");
            path
        }
        None => match write_draft(ctx, meta)? {
            Ok(path) => path,
            Err(reason) => return Ok(StageOutcome::Aborted(reason)),
        },
    };

    match ctx.approver.review(Checkpoint::DescriptionReview, &draft) {
        Decision::Approved => {
            accept(meta)?;
            Ok(StageOutcome::Advanced(Stage::DescriptionDone))
        }
        Decision::Rejected => {
            warn!(path = %draft.display(), "title/description rejected; edit the draft and resume");
            Ok(StageOutcome::AwaitingApproval(Checkpoint::DescriptionReview))
        }
        Decision::Deferred => {
            info!(path = %draft.display(), "title/description awaiting approval");
            Ok(StageOutcome::AwaitingApproval(Checkpoint::DescriptionReview))
        }
    }
}

pub fn accept(meta: &mut AssetMetadata) -> Result<()> {
    meta.advance(Stage::DescriptionDone)?;
    info!("title/description confirmed");
    Ok(())
}

fn load_template(ctx: &StageContext<'_>) -> Result<std::result::Result<ParsedTemplate, String>> {
    let found = locate_template(ctx.template, &ctx.layout.template_candidates());
    let raw = match (found, ctx.template) {
        (Some(path), _) => {
            info!(path = %path.display(), "using template");
            read_text(&path)?
        }
        (None, Some(explicit)) => {
            return Ok(Err(format!("template not found: {}", explicit.display())));
        }
        (None, None) => {
            info!("no template found, drafting from captions only");
            DEFAULT_TEMPLATE.to_string()
        }
    };
    let template = ParsedTemplate::parse(&raw);
    if !template.blocks.is_empty() {
        let names: Vec<&str> = template.blocks.keys().map(String::as_str).collect();
        info!(sections = %names.join(", "), "template sections parsed");
    }
    Ok(Ok(template))
}

/// Generates description then title, writes the draft and records it.
fn write_draft(ctx: &StageContext<'_>, meta: &mut AssetMetadata) -> Result<std::result::Result<PathBuf, String>> {
    let (language, captions_path) = ctx.source_captions(meta);
    if !captions_path.is_file() {
        return Ok(Err(format!("no captions found at {}", captions_path.display())));
    }
    let captions = read_text(&captions_path)?;
    let template = match load_template(ctx)? {
        Ok(template) => template,
        Err(reason) => return Ok(Err(reason)),
    };

    let identity = meta.knowledge_ref();
    ctx.injector.prepare(&identity);

    info!(lang = %language.code, "generating description");
    let user = prompts::description_user(&captions, &template);
    let user = ctx.injector.inject(&identity, Task::Description, &user);
    let description = ctx
        .generator
        .call_with_retry(&prompts::description_system(&language.name), &user)?;
    if description.trim().is_empty() {
        return Ok(Err("model returned an empty description".into()));
    }

    info!(lang = %language.code, "generating title");
    let user = prompts::title_user(&language.name, &captions, &description);
    let user = ctx.injector.inject(&identity, Task::Title, &user);
    let user = prompts::with_title_hints(user, &template);
    let title = ctx.generator.call_with_retry(prompts::SYSTEM_TITLE, &user)?;
    if title.trim().is_empty() {
        return Ok(Err("model returned an empty title".into()));
    }

    let path = ctx.layout.td_path(&language.code);
    write_text(&path, &format!("{}\n\n\n{}", title.trim(), description.trim()))?;
    info!(path = %path.display(), "title/description draft written");
    meta.set_artifact(TD_FILE, file_name(&path))?;
    meta.set_artifact(TD_LANG, &language.code)?;
    Ok(Ok(path))
}
