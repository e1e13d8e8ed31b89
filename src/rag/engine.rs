//! RAG Engine for chunk collection and processing.
//!
//! Turns extracted text into overlapping chunks, and fetches web content
//! for URL sources.

use std::sync::OnceLock;
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use super::loader;
use crate::core::config::RagSettings;
use crate::core::errors::ApiError;

/// Configuration for the RAG engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks
    pub chunk_overlap: usize,
    /// Maximum chunks kept per source
    pub max_chunks: usize,
    /// Timeout for web requests in seconds
    pub web_timeout_secs: u64,
    /// Largest response body accepted from a URL
    pub max_fetch_bytes: usize,
}

impl Default for RAGConfig {
    fn default() -> Self {
        Self::from(&RagSettings::default())
    }
}

impl From<&RagSettings> for RAGConfig {
    fn from(settings: &RagSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            max_chunks: settings.max_chunks_per_source,
            web_timeout_secs: settings.web_timeout_secs,
            max_fetch_bytes: settings.max_fetch_bytes,
        }
    }
}

/// A text chunk with source information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The text content
    pub text: String,
    /// Source identifier (URL, filename, etc.)
    pub source: String,
    /// Character offset in original document
    pub start_offset: usize,
    /// Chunk index within the source
    pub chunk_index: usize,
}

pub struct RAGEngine {
    config: RAGConfig,
    client: reqwest::Client,
}

impl RAGEngine {
    pub fn new(config: RAGConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.web_timeout_secs))
            .user_agent(concat!("ragchat-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RAGConfig {
        &self.config
    }

    /// Fetches a URL and returns its readable text.
    pub async fn fetch_url_text(&self, url: &str) -> Result<String, ApiError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ApiError::BadRequest(format!("Invalid URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ApiError::BadRequest(format!(
                "Failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_fetch_bytes {
                return Err(self.too_large(url));
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(item) = stream.next().await {
            let bytes = item.map_err(ApiError::upstream)?;
            if body.len() + bytes.len() > self.config.max_fetch_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&bytes);
        }

        if content_type.contains("application/pdf") {
            return loader::extract_pdf(&body);
        }

        let text = String::from_utf8_lossy(&body);
        if content_type.contains("html") || looks_like_html(&text) {
            Ok(strip_html_tags(&text))
        } else {
            Ok(text.into_owned())
        }
    }

    fn too_large(&self, url: &str) -> ApiError {
        ApiError::BadRequest(format!(
            "Content at {} exceeds {} bytes",
            url, self.config.max_fetch_bytes
        ))
    }

    /// Split text into overlapping chunks.
    pub fn split_into_chunks(&self, text: &str, source: &str) -> Vec<TextChunk> {
        let chunk_size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap.min(chunk_size - 1);
        let max_chunks = self.config.max_chunks;

        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        let mut start = 0;
        let mut chunk_index = 0;

        while start < total_chars && chunks.len() < max_chunks {
            let end = (start + chunk_size).min(total_chars);
            let window: String = chars[start..end].iter().collect();

            // Try to break at sentence boundary
            let window = if end < total_chars {
                find_sentence_boundary(&window)
            } else {
                window
            };
            let actual_end = start + window.chars().count();

            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    text: trimmed.to_string(),
                    source: source.to_string(),
                    start_offset: start,
                    chunk_index,
                });
                chunk_index += 1;
            }

            if actual_end >= total_chars {
                break;
            }
            start = actual_end.saturating_sub(overlap).max(start + 1);
        }

        chunks
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.chars().take(512).collect::<String>().to_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

fn html_patterns() -> &'static [(Regex, &'static str); 5] {
    static PATTERNS: OnceLock<[(Regex, &'static str); 5]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |pattern: &str| Regex::new(pattern).expect("static regex");
        [
            (build(r"(?is)<script\b.*?</script\s*>"), ""),
            (build(r"(?is)<style\b.*?</style\s*>"), ""),
            (build(r"(?s)<!--.*?-->"), ""),
            (
                build(r"(?i)<(br|/p|/div|/h[1-6]|/li|/tr|/title|/section|/article)\b[^>]*>"),
                "\n",
            ),
            (build(r"(?s)<[^>]*>"), ""),
        ]
    })
}

/// HTML to plain text: drops scripts, styles and tags, keeps block breaks.
pub fn strip_html_tags(html: &str) -> String {
    let mut text = html.to_string();
    for (pattern, replacement) in html_patterns() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    let text = decode_entities(&text);

    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    lines.join("\n")
}

/// Decodes the XML/HTML entities that commonly survive tag stripping.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Cuts the window after the last sentence ending in its final 20%.
fn find_sentence_boundary(text: &str) -> String {
    let sentence_endings = [". ", "! ", "? ", ".\n", "!\n", "?\n", "\n\n"];

    let char_count = text.chars().count();
    let search_start = text
        .char_indices()
        .nth((char_count * 80) / 100)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let search_text = &text[search_start..];

    let best = sentence_endings
        .iter()
        .filter_map(|ending| search_text.rfind(ending).map(|pos| pos + ending.len()))
        .max();

    match best {
        Some(cut) => text[..search_start + cut].to_string(),
        None => text.to_string(),
    }
}
