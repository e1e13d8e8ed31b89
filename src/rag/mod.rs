//! RAG (Retrieval-Augmented Generation) module.
//!
//! This module provides:
//! - `RAGEngine`: Chunks extracted text and fetches web content
//! - `loader`: Text extraction for uploaded documents
//! - `Embedder` / `VectorStore`: Per-session embedding index
//! - `RAGContextBuilder`: Builds the cited context for augmented answers
//! - `RetrievalBackend`: Ingestion and plain/augmented response generation

mod backend;
mod context_builder;
mod embedder;
mod engine;
mod loader;
mod store;

pub use backend::{DefaultRetrievalBackend, PreparedSource, RetrievalBackend};
pub use context_builder::{build_system_prompt, ContextBuilderConfig, RAGContextBuilder};
pub use embedder::{build_embedder, Embedder, HashEmbedder, ProviderEmbedder};
pub use engine::{strip_html_tags, RAGConfig, RAGEngine, TextChunk};
pub use loader::{load_document, DocumentFormat, DocumentUpload};
pub use store::{cosine_similarity, ChunkSearchResult, InMemoryVectorStore, StoredChunk, VectorStore};
