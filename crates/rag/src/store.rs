use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::{cast_slice, pod_collect_to_vec};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use vaio_core::{KbLocation, Result, VaioError};

use crate::chunk::chunk_text;
use crate::embedding::Embedder;
use crate::loader::{has_source_files, load_documents, Document};
use crate::retriever::{CategoryFilter, RetrievalResult};

/// One build lock per index file, shared by every handle in the process.
static BUILD_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn build_lock(path: &Path) -> Arc<RwLock<()>> {
    let mut locks = BUILD_LOCKS.lock();
    Arc::clone(
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(()))),
    )
}

fn index_err(err: rusqlite::Error) -> VaioError {
    VaioError::Index(err.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub collection: String,
    pub count: usize,
    pub persist_path: PathBuf,
    pub source_dir: PathBuf,
    pub embedder: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub position: usize,
    pub source: String,
    pub category: String,
    pub text: String,
}

/// Persistent vector collection for one knowledge-base identity.
pub struct KnowledgeIndex {
    location: KbLocation,
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    chunk_chars: usize,
    lock: Arc<RwLock<()>>,
}

impl KnowledgeIndex {
    /// Opens (creating if needed) the collection; an empty one is fine.
    pub fn open(location: KbLocation, embedder: Arc<dyn Embedder>, chunk_chars: usize) -> Result<Self> {
        fs::create_dir_all(&location.persist_dir)?;
        let path = location.index_path();
        let index = Self {
            lock: build_lock(&path),
            path,
            location,
            embedder,
            chunk_chars,
        };
        index.init()?;
        Ok(index)
    }

    pub fn location(&self) -> &KbLocation {
        &self.location
    }

    fn connection(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(index_err)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                embedder TEXT NOT NULL,
                built_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                position INTEGER NOT NULL,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                fields TEXT,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection, category);
            "#,
        )
        .map_err(index_err)
    }

    pub fn count(&self) -> Result<usize> {
        let _guard = self.lock.read();
        self.count_unlocked()
    }

    fn count_unlocked(&self) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                [&self.location.collection],
                |row| row.get(0),
            )
            .map_err(index_err)?;
        Ok(count.max(0) as usize)
    }

    fn built_with(&self, conn: &Connection) -> Result<Option<String>> {
        conn.query_row(
            "SELECT embedder FROM collections WHERE name = ?1",
            [&self.location.collection],
            |row| row.get(0),
        )
        .optional()
        .map_err(index_err)
    }

    /// Replaces the collection with `documents`; readers see old or new, never a mix.
    pub fn build_or_rebuild(&self, documents: &[Document]) -> Result<IndexStats> {
        let _guard = self.lock.write();
        self.rebuild_unlocked(documents)?;
        self.stats_unlocked()
    }

    fn rebuild_unlocked(&self, documents: &[Document]) -> Result<usize> {
        let mut pending: Vec<(&Document, String)> = Vec::new();
        for doc in documents {
            for chunk in chunk_text(&doc.text, self.chunk_chars) {
                pending.push((doc, chunk));
            }
        }
        let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        let current = self.embedder.id();
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(index_err)?;
        // Every vector is replaced below, so the collection stays single-provider.
        if let Some(previous) = self.built_with(&tx)?.filter(|built| *built != current) {
            warn!(
                collection = %self.location.collection,
                from = %previous,
                to = %current,
                "embedding provider switched; collection re-embedded"
            );
        }
        tx.execute(
            "DELETE FROM chunks WHERE collection = ?1",
            [&self.location.collection],
        )
        .map_err(index_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO collections (name, embedder, built_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![self.location.collection, current],
        )
        .map_err(index_err)?;
        for (position, ((doc, text), vector)) in pending.iter().zip(vectors.iter()).enumerate() {
            let fields = if doc.fields.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&doc.fields)?)
            };
            tx.execute(
                "INSERT INTO chunks (collection, position, source, category, fields, text, embedding) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    self.location.collection,
                    position as i64,
                    doc.source,
                    doc.category,
                    fields,
                    text,
                    cast_slice::<f32, u8>(vector),
                ],
            )
            .map_err(index_err)?;
        }
        tx.commit().map_err(index_err)?;
        info!(
            collection = %self.location.collection,
            documents = documents.len(),
            chunks = pending.len(),
            "knowledge index rebuilt"
        );
        Ok(pending.len())
    }

    /// Loads the identity's source location and rebuilds from it.
    pub fn rebuild_from_source(&self) -> Result<IndexStats> {
        fs::create_dir_all(&self.location.source_dir)?;
        let documents = load_documents(&self.location.source_dir);
        if documents.is_empty() {
            warn!(dir = %self.location.source_dir.display(), "no documents found");
        }
        self.build_or_rebuild(&documents)
    }

    /// Builds only when the collection is empty and the source has files.
    pub fn build_if_empty(&self) -> Result<bool> {
        if self.count()? > 0 || !has_source_files(&self.location.source_dir) {
            return Ok(false);
        }
        let _guard = self.lock.write();
        // Another handle may have finished a build while we waited.
        if self.count_unlocked()? > 0 {
            return Ok(false);
        }
        let documents = load_documents(&self.location.source_dir);
        if documents.is_empty() {
            return Ok(false);
        }
        self.rebuild_unlocked(&documents)?;
        Ok(true)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let _guard = self.lock.read();
        self.stats_unlocked()
    }

    fn stats_unlocked(&self) -> Result<IndexStats> {
        let conn = self.connection()?;
        Ok(IndexStats {
            name: self.location.name.clone(),
            collection: self.location.collection.clone(),
            count: self.count_unlocked()?,
            persist_path: self.location.persist_dir.clone(),
            source_dir: self.location.source_dir.clone(),
            embedder: self.built_with(&conn)?,
        })
    }

    pub fn list(&self, limit: usize) -> Result<Vec<StoredChunk>> {
        let _guard = self.lock.read();
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT position, source, category, text FROM chunks WHERE collection = ?1 ORDER BY position LIMIT ?2",
            )
            .map_err(index_err)?;
        let rows = stmt
            .query_map(params![self.location.collection, limit as i64], |row| {
                Ok(StoredChunk {
                    position: row.get::<_, i64>(0)?.max(0) as usize,
                    source: row.get(1)?,
                    category: row.get(2)?,
                    text: row.get(3)?,
                })
            })
            .map_err(index_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(index_err)
    }

    /// Drops the collection's entries; the source files are untouched.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.write();
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(index_err)?;
        tx.execute(
            "DELETE FROM chunks WHERE collection = ?1",
            [&self.location.collection],
        )
        .map_err(index_err)?;
        tx.execute(
            "DELETE FROM collections WHERE name = ?1",
            [&self.location.collection],
        )
        .map_err(index_err)?;
        tx.commit().map_err(index_err)?;
        info!(collection = %self.location.collection, "knowledge index cleared");
        Ok(())
    }

    /// Top-k chunks by cosine similarity; the category predicate is part of the query.
    pub fn search(&self, query: &str, top_k: usize, filter: &CategoryFilter) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.lock.read();
        let conn = self.connection()?;
        let current = self.embedder.id();
        match self.built_with(&conn)? {
            Some(built) if built != current => {
                return Err(VaioError::EmbeddingProviderMismatch {
                    collection: self.location.collection.clone(),
                    built_with: built,
                    current,
                })
            }
            Some(_) => {}
            None => return Ok(Vec::new()),
        }
        let query_embedding = self.embedder.embed(query)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT source, text, embedding
                FROM chunks
                WHERE collection = ?1 AND (?2 IS NULL OR category = ?2)
                "#,
            )
            .map_err(index_err)?;
        let mut rows = stmt
            .query(params![self.location.collection, filter.category()])
            .map_err(index_err)?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().map_err(index_err)? {
            let embedding_blob: Vec<u8> = row.get(2).map_err(index_err)?;
            if embedding_blob.len() % std::mem::size_of::<f32>() != 0 {
                return Err(VaioError::Index("invalid embedding blob".to_string()));
            }
            let embedding: Vec<f32> = pod_collect_to_vec(&embedding_blob);
            hits.push(RetrievalResult {
                source: row.get(0).map_err(index_err)?,
                text: row.get(1).map_err(index_err)?,
                score: Some(cosine_similarity(&query_embedding, &embedding)),
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        debug!(collection = %self.location.collection, hits = hits.len(), "knowledge search");
        Ok(hits)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use vaio_core::{KbRoots, KnowledgeRef};

    struct Counting {
        inner: EmbeddingClient,
        calls: AtomicUsize,
        id: &'static str,
    }

    impl Counting {
        fn new(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                inner: EmbeddingClient::hash(),
                calls: AtomicUsize::new(0),
                id,
            })
        }
    }

    impl Embedder for Counting {
        fn id(&self) -> String {
            self.id.to_string()
        }

        fn embed_batch(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(inputs)
        }
    }

    fn doc(text: &str, source: &str, category: &str) -> Document {
        Document {
            text: text.to_string(),
            source: source.to_string(),
            category: category.to_string(),
            fields: Default::default(),
        }
    }

    fn location(dir: &Path) -> KbLocation {
        let roots = KbRoots::new(dir.join("knowledge"), dir.join("data"));
        KnowledgeRef::Default.resolve(&roots).unwrap()
    }

    #[test]
    fn open_on_fresh_location_has_zero_entries() {
        let dir = tempdir().unwrap();
        let index = KnowledgeIndex::open(location(dir.path()), Counting::new("t"), 1500).unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(index
            .search("anything", 3, &CategoryFilter::Any)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn rebuild_replaces_previous_contents() {
        let dir = tempdir().unwrap();
        let index = KnowledgeIndex::open(location(dir.path()), Counting::new("t"), 1500).unwrap();
        index
            .build_or_rebuild(&[doc("alpha", "a.txt", "marketing"), doc("beta", "b.txt", "reference")])
            .unwrap();
        assert_eq!(index.count().unwrap(), 2);
        let stats = index.build_or_rebuild(&[doc("gamma", "c.txt", "marketing")]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.embedder.as_deref(), Some("t"));
        let listed = index.list(10).unwrap();
        assert_eq!(listed[0].text, "gamma");
    }

    #[test]
    fn category_filter_applies_before_top_k() {
        let dir = tempdir().unwrap();
        let index = KnowledgeIndex::open(location(dir.path()), Counting::new("t"), 1500).unwrap();
        index
            .build_or_rebuild(&[
                doc("launch video product launch", "r1.txt", "reference"),
                doc("launch video product", "r2.txt", "reference"),
                doc("brand slogan for launch", "m1.txt", "marketing"),
            ])
            .unwrap();
        let hits = index
            .search("launch video product", 1, &CategoryFilter::only("marketing"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "m1.txt");
        let all = index.search("launch video product", 2, &CategoryFilter::Any).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].score >= all[1].score);
    }

    #[test]
    fn build_if_empty_runs_once() {
        let dir = tempdir().unwrap();
        let loc = location(dir.path());
        fs::create_dir_all(&loc.source_dir).unwrap();
        fs::write(loc.source_dir.join("brand.md"), "Our brand voice is calm.").unwrap();
        let embedder = Counting::new("t");
        let index = KnowledgeIndex::open(loc, embedder.clone(), 1500).unwrap();

        assert!(index.build_if_empty().unwrap());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert!(!index.build_if_empty().unwrap());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn build_if_empty_without_sources_is_a_noop() {
        let dir = tempdir().unwrap();
        let embedder = Counting::new("t");
        let index = KnowledgeIndex::open(location(dir.path()), embedder.clone(), 1500).unwrap();
        assert!(!index.build_if_empty().unwrap());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn querying_with_another_provider_is_refused() {
        let dir = tempdir().unwrap();
        let loc = location(dir.path());
        let first = KnowledgeIndex::open(loc.clone(), Counting::new("hash:64"), 1500).unwrap();
        first.build_or_rebuild(&[doc("alpha", "a.txt", "marketing")]).unwrap();
        let second = KnowledgeIndex::open(loc, Counting::new("ollama:x"), 1500).unwrap();
        let err = second.search("alpha", 3, &CategoryFilter::Any).unwrap_err();
        assert!(matches!(err, VaioError::EmbeddingProviderMismatch { .. }));
    }

    #[test]
    fn full_rebuild_switches_the_recorded_provider() {
        let dir = tempdir().unwrap();
        let loc = location(dir.path());
        let old = Counting::new("hash:64");
        let first = KnowledgeIndex::open(loc.clone(), old, 1500).unwrap();
        first
            .build_or_rebuild(&[doc("alpha", "a.txt", "marketing"), doc("beta", "b.txt", "reference")])
            .unwrap();

        let new = Counting::new("ollama:x");
        let second = KnowledgeIndex::open(loc, Arc::clone(&new) as Arc<dyn Embedder>, 1500).unwrap();
        let stats = second.build_or_rebuild(&[doc("alpha", "a.txt", "marketing")]).unwrap();
        assert_eq!(stats.embedder.as_deref(), Some("ollama:x"));
        assert_eq!(stats.count, 1);
        assert_eq!(new.calls.load(Ordering::SeqCst), 1);

        assert_eq!(second.search("alpha", 3, &CategoryFilter::Any).unwrap().len(), 1);
        let err = first.search("alpha", 3, &CategoryFilter::Any).unwrap_err();
        assert!(matches!(err, VaioError::EmbeddingProviderMismatch { .. }));
    }

    #[test]
    fn clear_keeps_source_files() {
        let dir = tempdir().unwrap();
        let loc = location(dir.path());
        fs::create_dir_all(&loc.source_dir).unwrap();
        fs::write(loc.source_dir.join("a.txt"), "alpha").unwrap();
        let index = KnowledgeIndex::open(loc.clone(), Counting::new("t"), 1500).unwrap();
        index.rebuild_from_source().unwrap();
        assert_eq!(index.count().unwrap(), 1);
        index.clear().unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(loc.source_dir.join("a.txt").exists());
        assert!(index.stats().unwrap().embedder.is_none());
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
