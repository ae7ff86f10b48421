use std::fmt;
use std::sync::Arc;

use tracing::debug;

use vaio_core::{KnowledgeRef, VaioConfig, DEFAULT_CONTEXT_THRESHOLD};

use crate::loader::CATEGORY_MARKETING;
use crate::retriever::{CategoryFilter, RetrievalResult, Retrieve};

const QUERY_PREFIX_CHARS: usize = 400;
const BLOCK_OPEN: &str = "---\nContext (from KB):";
const BLOCK_CLOSE: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Title,
    Description,
    Translate,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Title => "title",
            Task::Description => "desc",
            Task::Translate => "translate",
        }
    }

    /// Copywriting tasks only see marketing material.
    pub fn filter(&self) -> CategoryFilter {
        match self {
            Task::Title | Task::Description => CategoryFilter::only(CATEGORY_MARKETING),
            Task::Translate => CategoryFilter::Any,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InjectionSettings {
    pub top_k: usize,
    pub threshold: f32,
    pub max_chars: usize,
}

impl InjectionSettings {
    pub fn from_config(cfg: &VaioConfig) -> Self {
        Self {
            top_k: cfg.context_top_k,
            threshold: cfg.context_threshold,
            max_chars: cfg.context_max_chars,
        }
    }
}

impl Default for InjectionSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            threshold: DEFAULT_CONTEXT_THRESHOLD,
            max_chars: 4000,
        }
    }
}

/// Prepends confidence-filtered knowledge snippets to generation prompts.
#[derive(Clone)]
pub struct ContextInjector {
    retriever: Arc<dyn Retrieve>,
    settings: InjectionSettings,
}

impl ContextInjector {
    pub fn new(retriever: Arc<dyn Retrieve>, settings: InjectionSettings) -> Self {
        Self {
            retriever,
            settings,
        }
    }

    pub fn prepare(&self, identity: &KnowledgeRef) {
        self.retriever.prepare(identity);
    }

    pub fn inject(&self, identity: &KnowledgeRef, task: Task, prompt: &str) -> String {
        self.inject_top_k(identity, task, prompt, self.settings.top_k)
    }

    /// The result always contains `prompt` verbatim.
    pub fn inject_top_k(&self, identity: &KnowledgeRef, task: Task, prompt: &str, top_k: usize) -> String {
        if identity.is_disabled() || top_k == 0 {
            return prompt.to_string();
        }
        let query = lookup_query(task, prompt);
        let candidates = self.retriever.retrieve(identity, &query, top_k, &task.filter());
        let kept = confident(candidates, self.settings.threshold);
        match render_block(&kept, self.settings.max_chars) {
            Some(block) => {
                debug!(task = %task, snippets = kept.len(), "context injected");
                format!("{block}\n\n{prompt}")
            }
            None => prompt.to_string(),
        }
    }
}

fn lookup_query(task: Task, prompt: &str) -> String {
    let prefix: String = prompt.chars().take(QUERY_PREFIX_CHARS).collect();
    format!("{} context: {}", task.as_str(), prefix)
}

/// Unscored candidates pass; scored ones must beat the threshold.
pub fn confident(candidates: Vec<RetrievalResult>, threshold: f32) -> Vec<RetrievalResult> {
    candidates
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .filter(|c| c.score.map_or(true, |s| s > threshold))
        .collect()
}

fn render_block(snippets: &[RetrievalResult], max_chars: usize) -> Option<String> {
    let mut body = String::new();
    let mut budget = max_chars;
    for (idx, snippet) in snippets.iter().enumerate() {
        let entry = format!("[{}] (source: {})\n{}", idx + 1, snippet.source, snippet.text.trim());
        let needed = entry.chars().count() + if body.is_empty() { 0 } else { 2 };
        if needed > budget {
            if body.is_empty() && budget > 0 {
                body = entry.chars().take(budget).collect();
            }
            break;
        }
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(&entry);
        budget -= needed;
    }
    if body.is_empty() {
        return None;
    }
    Some(format!("{BLOCK_OPEN}\n{body}\n{BLOCK_CLOSE}"))
}
