use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::{ChatRequest, TextStream, STREAM_CHANNEL_CAPACITY};
use crate::core::config::LlmSettings;
use crate::core::errors::ApiError;

/// Azure OpenAI chat-completions and embeddings over REST.
#[derive(Clone)]
pub struct AzureOpenAiProvider {
    endpoint: Option<String>,
    api_key: Option<String>,
    api_version: String,
    client: Client,
}

impl AzureOpenAiProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            endpoint: settings
                .endpoint
                .as_ref()
                .map(|e| e.trim().trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            api_version: settings.api_version.clone(),
            client,
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ApiError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            ApiError::Unconfigured("AZ_OPENAI_ENDPOINT is not set".to_string())
        })?;
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ApiError::Unconfigured("AZ_OPENAI_API_KEY is not set".to_string())
        })?;
        Ok((endpoint, api_key))
    }

    fn deployment_url(&self, endpoint: &str, deployment: &str, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            endpoint, deployment, operation, self.api_version
        )
    }
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "azure-openai"
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        deployment: &str,
    ) -> Result<TextStream, ApiError> {
        let (endpoint, api_key) = self.credentials()?;
        let url = self.deployment_url(endpoint, deployment, "chat/completions");

        let mut body = json!({
            "messages": request.messages,
            "stream": true,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        let res = self
            .client
            .post(&url)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Azure OpenAI chat error ({}): {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(forward_sse(res.bytes_stream(), tx));

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], deployment: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let (endpoint, api_key) = self.credentials()?;
        let url = self.deployment_url(endpoint, deployment, "embeddings");

        let body = json!({
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Azure OpenAI embeddings error ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        let embeddings = parse_embeddings(&payload)?;
        if embeddings.len() != inputs.len() {
            return Err(ApiError::Upstream(format!(
                "Expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Reassembles SSE lines that may be split across network chunks.
///
/// Bytes are buffered until a newline so multi-byte characters split
/// between chunks decode intact.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Forwards content deltas from an SSE body until `data: [DONE]`.
///
/// A body that ends without `[DONE]` was cut off; the receiver gets an
/// error instead of a silently truncated answer.
async fn forward_sse<S, B, E>(stream: S, tx: mpsc::Sender<Result<String, ApiError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut lines = SseLineBuffer::default();
    while let Some(item) = stream.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(ApiError::upstream(e))).await;
                return;
            }
        };
        for line in lines.push(bytes.as_ref()) {
            match parse_sse_line(&line) {
                SseEvent::Delta(content) => {
                    if tx.send(Ok(content)).await.is_err() {
                        return;
                    }
                }
                SseEvent::Done => return,
                SseEvent::Skip => {}
            }
        }
    }

    if let Some(line) = lines.finish() {
        match parse_sse_line(&line) {
            SseEvent::Done => return,
            SseEvent::Delta(content) => {
                if tx.send(Ok(content)).await.is_err() {
                    return;
                }
            }
            SseEvent::Skip => {}
        }
    }
    let _ = tx
        .send(Err(ApiError::Upstream(
            "Azure OpenAI stream ended before completion".to_string(),
        )))
        .await;
}

fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    let Ok(json) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Skip;
    };
    // Azure sends a leading event with prompt filter results and no choices.
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseEvent::Delta(content.to_string()),
        _ => SseEvent::Skip,
    }
}

fn parse_embeddings(payload: &Value) -> Result<Vec<Vec<f32>>, ApiError> {
    let data = payload["data"]
        .as_array()
        .ok_or_else(|| ApiError::Upstream("Embeddings response has no data".to_string()))?;

    let mut items: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
        let Some(vals) = item["embedding"].as_array() else {
            return Err(ApiError::Upstream(
                "Embeddings response item has no vector".to_string(),
            ));
        };
        let vec: Vec<f32> = vals
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        items.push((index, vec));
    }
    items.sort_by_key(|(index, _)| *index);

    Ok(items.into_iter().map(|(_, vec)| vec).collect())
}
