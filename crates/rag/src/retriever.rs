use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use vaio_core::{KbRoots, KnowledgeRef, Result};

use crate::embedding::Embedder;
use crate::store::KnowledgeIndex;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub text: String,
    pub source: String,
    pub score: Option<f32>,
}

/// Category predicate pushed into the index query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    Any,
    Only(String),
}

impl CategoryFilter {
    pub fn only(category: impl Into<String>) -> Self {
        CategoryFilter::Only(category.into())
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            CategoryFilter::Any => None,
            CategoryFilter::Only(category) => Some(category.as_str()),
        }
    }
}

pub trait Retrieve: Send + Sync {
    /// Never fails: disabled, empty or broken indexes yield no results.
    fn retrieve(
        &self,
        identity: &KnowledgeRef,
        query: &str,
        top_k: usize,
        filter: &CategoryFilter,
    ) -> Vec<RetrievalResult>;

    /// First-use hook run before a generation stage.
    fn prepare(&self, _identity: &KnowledgeRef) {}
}

/// Resolves identities against the configured roots and one shared embedder.
#[derive(Clone)]
pub struct Retriever {
    roots: KbRoots,
    embedder: Arc<dyn Embedder>,
    chunk_chars: usize,
}

impl Retriever {
    pub fn new(roots: KbRoots, embedder: Arc<dyn Embedder>, chunk_chars: usize) -> Self {
        Self {
            roots,
            embedder,
            chunk_chars,
        }
    }

    pub fn roots(&self) -> &KbRoots {
        &self.roots
    }

    /// `None` when the identity is disabled.
    pub fn index_for(&self, identity: &KnowledgeRef) -> Option<Result<KnowledgeIndex>> {
        let location = identity.resolve(&self.roots)?;
        Some(KnowledgeIndex::open(
            location,
            Arc::clone(&self.embedder),
            self.chunk_chars,
        ))
    }

    fn search(
        &self,
        identity: &KnowledgeRef,
        query: &str,
        top_k: usize,
        filter: &CategoryFilter,
    ) -> Result<Vec<RetrievalResult>> {
        let Some(index) = self.index_for(identity) else {
            return Ok(Vec::new());
        };
        let index = index?;
        if index.count()? == 0 {
            debug!(collection = %index.location().collection, "knowledge collection is empty");
            return Ok(Vec::new());
        }
        index.search(query, top_k, filter)
    }
}

impl Retrieve for Retriever {
    fn retrieve(
        &self,
        identity: &KnowledgeRef,
        query: &str,
        top_k: usize,
        filter: &CategoryFilter,
    ) -> Vec<RetrievalResult> {
        match self.search(identity, query, top_k, filter) {
            Ok(results) => results,
            Err(err) => {
                warn!(knowledge = %identity, error = %err, "retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    fn prepare(&self, identity: &KnowledgeRef) {
        let index = match self.index_for(identity) {
            None => {
                info!("knowledge base disabled for this asset");
                return;
            }
            Some(Ok(index)) => index,
            Some(Err(err)) => {
                warn!(knowledge = %identity, error = %err, "knowledge base unavailable");
                return;
            }
        };
        match index.build_if_empty() {
            Ok(true) => info!(collection = %index.location().collection, "knowledge base built on first use"),
            Ok(false) => {}
            Err(err) => warn!(knowledge = %identity, error = %err, "knowledge base preparation skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClient;
    use std::fs;
    use tempfile::tempdir;

    fn retriever(dir: &std::path::Path) -> Retriever {
        Retriever::new(
            KbRoots::new(dir.join("knowledge"), dir.join("data")),
            Arc::new(EmbeddingClient::hash()),
            1500,
        )
    }

    #[test]
    fn disabled_identity_returns_nothing() {
        let dir = tempdir().unwrap();
        let r = retriever(dir.path());
        assert!(r
            .retrieve(&KnowledgeRef::Disabled, "q", 3, &CategoryFilter::Any)
            .is_empty());
        assert!(r.index_for(&KnowledgeRef::Disabled).is_none());
    }

    #[test]
    fn empty_collection_returns_nothing() {
        let dir = tempdir().unwrap();
        let r = retriever(dir.path());
        assert!(r
            .retrieve(&KnowledgeRef::Default, "q", 3, &CategoryFilter::Any)
            .is_empty());
    }

    #[test]
    fn prepare_builds_then_retrieves() {
        let dir = tempdir().unwrap();
        let r = retriever(dir.path());
        let source = r.roots().default_source_dir();
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("brand.md"), "Acme makes calm espresso machines.").unwrap();
        r.prepare(&KnowledgeRef::Default);
        let hits = r.retrieve(&KnowledgeRef::Default, "espresso machines", 3, &CategoryFilter::Any);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score.unwrap() > 0.35);
    }

    #[test]
    fn broken_index_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let r = retriever(dir.path());
        let persist = dir.path().join("data").join("default");
        fs::create_dir_all(&persist).unwrap();
        fs::write(persist.join("index.sqlite"), "not a database").unwrap();
        assert!(r
            .retrieve(&KnowledgeRef::Default, "q", 3, &CategoryFilter::Any)
            .is_empty());
    }
}
