//! VectorStore trait and the in-process implementation.
//!
//! One store belongs to one session; it is created on the first
//! successful ingestion and dropped with the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::errors::ApiError;

/// A stored RAG chunk with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Unique chunk identifier.
    pub chunk_id: String,
    /// The text content of the chunk.
    pub content: String,
    /// Display name of the source (file name or URL).
    pub source: String,
    /// Id of the `SourceDescriptor` this chunk came from.
    pub source_id: Uuid,
    /// Position of the chunk within its source.
    pub chunk_index: usize,
    /// Character offset in the extracted source text.
    pub start_offset: usize,
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert chunks with their embeddings. All vectors must share one dimension.
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Top `limit` chunks by similarity to `query_embedding`, best first.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;
}

#[derive(Default)]
struct StoreInner {
    chunks: Vec<StoredChunk>,
    embeddings: Vec<Vec<f32>>,
    dimension: Option<usize>,
}

/// Brute-force cosine search over chunks held in memory.
#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().await;

        // Validate the whole batch first so a bad vector inserts nothing.
        let mut dimension = inner.dimension;
        for (chunk, embedding) in &items {
            if embedding.is_empty() {
                return Err(ApiError::Upstream(format!(
                    "Empty embedding for chunk {}",
                    chunk.chunk_id
                )));
            }
            match dimension {
                Some(expected) if expected != embedding.len() => {
                    return Err(ApiError::Internal(format!(
                        "Embedding dimension mismatch: expected {}, got {}",
                        expected,
                        embedding.len()
                    )));
                }
                None => dimension = Some(embedding.len()),
                _ => {}
            }
        }
        inner.dimension = dimension;

        for (chunk, embedding) in items {
            inner.chunks.push(chunk);
            inner.embeddings.push(embedding);
        }
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        let inner = self.inner.read().await;
        if let Some(expected) = inner.dimension {
            if expected != query_embedding.len() {
                return Err(ApiError::Internal(format!(
                    "Query dimension mismatch: expected {}, got {}",
                    expected,
                    query_embedding.len()
                )));
            }
        }

        let mut scored: Vec<ChunkSearchResult> = inner
            .chunks
            .iter()
            .zip(inner.embeddings.iter())
            .map(|(chunk, embedding)| ChunkSearchResult {
                chunk: chunk.clone(),
                score: cosine_similarity(query_embedding, embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        Ok(self.inner.read().await.chunks.len())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
