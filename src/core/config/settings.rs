//! Typed view of the merged configuration.
//!
//! Every field has a default, so an empty `config.yml` yields a working
//! setup once the Azure credentials are present in the environment.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "azure-openai/gpt-35-turbo";
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

pub const DEFAULT_RAG_SYSTEM_PROMPT: &str = "You are a helpful assistant. You will have to answer to user's queries.
You will have some context to help with your answers, but it will not always be completely related or helpful.
You can also use your knowledge to assist answering the user's queries.

{context}";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub rag: RagSettings,
    pub chat: ChatSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub models: Vec<String>,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "azure-openai".to_string(),
            endpoint: None,
            api_key: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            temperature: 0.3,
            max_tokens: None,
            models: vec![DEFAULT_MODEL.to_string()],
            embedding_model: "text-embedding-3-large".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    Provider,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub embedder: EmbedderKind,
    pub hash_dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunks_per_source: usize,
    pub max_sources: usize,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_context_length: usize,
    pub include_citations: bool,
    pub web_timeout_secs: u64,
    pub max_fetch_bytes: usize,
    pub max_upload_bytes: usize,
    pub system_prompt: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            embedder: EmbedderKind::Provider,
            hash_dimension: 256,
            chunk_size: 5000,
            chunk_overlap: 1000,
            max_chunks_per_source: 500,
            max_sources: 10,
            top_k: 4,
            similarity_threshold: 0.0,
            max_context_length: 24_000,
            include_citations: true,
            web_timeout_secs: 30,
            max_fetch_bytes: 10 * 1024 * 1024,
            max_upload_bytes: 25 * 1024 * 1024,
            system_prompt: DEFAULT_RAG_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub max_input_length: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_input_length: 32_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            reap_interval_secs: 60,
        }
    }
}

impl LlmSettings {
    pub fn default_model(&self) -> &str {
        self.models
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_defaults() {
        let settings: AppSettings = serde_json::from_value(json!({})).expect("defaults");
        assert_eq!(settings.server.port, 8501);
        assert_eq!(settings.llm.models, vec![DEFAULT_MODEL.to_string()]);
        assert_eq!(settings.llm.api_version, "2024-02-15-preview");
        assert!((settings.llm.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.rag.max_sources, 10);
        assert_eq!(settings.rag.embedder, EmbedderKind::Provider);
        assert!(settings.rag.system_prompt.contains("{context}"));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings: AppSettings = serde_json::from_value(json!({
            "rag": { "chunk_size": 800, "embedder": "hash" },
            "llm": { "temperature": 0.7 }
        }))
        .expect("partial config");

        assert_eq!(settings.rag.chunk_size, 800);
        assert_eq!(settings.rag.chunk_overlap, 1000);
        assert_eq!(settings.rag.embedder, EmbedderKind::Hash);
        assert!((settings.llm.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(settings.llm.default_model(), DEFAULT_MODEL);
    }
}
