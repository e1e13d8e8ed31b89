//! RAG Context Builder.
//!
//! Builds context strings from retrieved chunks by:
//! 1. Dropping results under the similarity threshold
//! 2. Keeping the top-k most similar chunks
//! 3. Formatting them into a context string with citations

use serde::{Deserialize, Serialize};

use super::store::ChunkSearchResult;
use crate::core::config::RagSettings;

/// Placeholder in the system prompt template replaced by the context.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Configuration for context building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBuilderConfig {
    /// Maximum number of chunks to include
    pub top_k: usize,
    /// Maximum total context length in characters
    pub max_context_length: usize,
    /// Whether to include source citations
    pub include_citations: bool,
    /// Similarity threshold (cosine)
    pub similarity_threshold: f32,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self::from(&RagSettings::default())
    }
}

impl From<&RagSettings> for ContextBuilderConfig {
    fn from(settings: &RagSettings) -> Self {
        Self {
            top_k: settings.top_k,
            max_context_length: settings.max_context_length,
            include_citations: settings.include_citations,
            similarity_threshold: settings.similarity_threshold,
        }
    }
}

/// RAG Context Builder.
pub struct RAGContextBuilder {
    config: ContextBuilderConfig,
}

impl RAGContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextBuilderConfig {
        &self.config
    }

    /// Build context from search results, best first.
    pub fn build_context(&self, results: &[ChunkSearchResult]) -> String {
        let mut selected: Vec<&ChunkSearchResult> = results
            .iter()
            .filter(|r| r.score >= self.config.similarity_threshold)
            .collect();

        selected.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        selected.truncate(self.config.top_k);

        self.format_context(&selected)
    }

    fn format_context(&self, selected: &[&ChunkSearchResult]) -> String {
        let max_length = self.config.max_context_length;
        let mut context = String::new();
        let mut current_length = 0;

        for (i, result) in selected.iter().enumerate() {
            let entry = if self.config.include_citations {
                format!(
                    "[{}] (Source: {})\n{}\n\n",
                    i + 1,
                    result.chunk.source,
                    result.chunk.content
                )
            } else {
                format!("{}\n\n", result.chunk.content)
            };

            let entry_length = entry.chars().count();
            if current_length + entry_length > max_length {
                // The best chunk is cut to fit rather than dropped.
                if i == 0 {
                    context.extend(entry.chars().take(max_length));
                }
                break;
            }

            context.push_str(&entry);
            current_length += entry_length;
        }

        context.trim().to_string()
    }

    /// Get the distinct sources cited in a context string.
    pub fn get_sources(&self, context: &str) -> Vec<String> {
        let mut sources = Vec::new();
        for line in context.lines() {
            if let Some(start) = line.find("(Source: ") {
                let rest = &line[start + "(Source: ".len()..];
                if let Some(end) = rest.rfind(')') {
                    sources.push(rest[..end].to_string());
                }
            }
        }
        sources.sort();
        sources.dedup();
        sources
    }
}

/// Substitutes the context into the system prompt template.
pub fn build_system_prompt(template: &str, context: &str) -> String {
    template.replace(CONTEXT_PLACEHOLDER, context)
}
