pub mod chunk;
pub mod convert;
pub mod embedding;
pub mod inject;
pub mod loader;
pub mod retriever;
pub mod store;

pub use chunk::chunk_text;
pub use embedding::{Embedder, EmbeddingBackend, EmbeddingClient, HashEmbedder, HashEmbedderConfig};
pub use inject::{confident, ContextInjector, InjectionSettings, Task};
pub use loader::{load_documents, Document, CATEGORY_MARKETING, CATEGORY_REFERENCE};
pub use retriever::{CategoryFilter, RetrievalResult, Retrieve, Retriever};
pub use store::{cosine_similarity, IndexStats, KnowledgeIndex, StoredChunk};
