use async_trait::async_trait;

use crate::core::config::{EmbedderKind, RagSettings};
use crate::core::errors::ApiError;
use crate::llm::LlmService;

/// Inputs sent per embeddings request.
const EMBED_BATCH_SIZE: usize = 16;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}

/// Embeds through the configured LLM provider's embedding deployment.
pub struct ProviderEmbedder {
    llm: LlmService,
}

impl ProviderEmbedder {
    pub fn new(llm: LlmService) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        self.llm.provider_name()
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.llm.embed(batch).await?);
        }
        Ok(vectors)
    }
}

const FNV_OFFSET: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Offline embedder: hashed bag of lowercase word tokens, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(token.to_lowercase().as_bytes()) % self.dimension as u64) as usize;
            vec[bucket] += 1.0;
        }

        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs.iter().map(|text| self.hash_to_vec(text)).collect())
    }
}

pub fn build_embedder(settings: &RagSettings, llm: &LlmService) -> Box<dyn Embedder> {
    match settings.embedder {
        EmbedderKind::Provider => Box::new(ProviderEmbedder::new(llm.clone())),
        EmbedderKind::Hash => Box::new(HashEmbedder::new(settings.hash_dimension)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::store::cosine_similarity;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let inputs = vec!["Rust ownership rules".to_string(), "rust OWNERSHIP rules".to_string()];
        let vectors = embedder.embed(&inputs).await.expect("embed");

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
        assert_eq!(vectors[0], vectors[1]);
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_words_score_higher() {
        let embedder = HashEmbedder::new(256);
        let inputs = vec![
            "the borrow checker enforces ownership".to_string(),
            "how does the borrow checker work".to_string(),
            "bananas grow in tropical climates".to_string(),
        ];
        let v = embedder.embed(&inputs).await.expect("embed");

        assert!(cosine_similarity(&v[1], &v[0]) > cosine_similarity(&v[1], &v[2]));
    }

    #[tokio::test]
    async fn empty_text_yields_zero_vector() {
        let embedder = HashEmbedder::new(8);
        let v = embedder.embed(&["".to_string()]).await.expect("embed");
        assert_eq!(v[0], vec![0.0; 8]);
    }
}
