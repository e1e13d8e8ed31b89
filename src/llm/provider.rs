use async_trait::async_trait;

use super::types::{ChatRequest, TextStream};
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "azure-openai")
    fn name(&self) -> &str;

    /// whether endpoint and credentials are present
    fn is_configured(&self) -> bool;

    /// chat completion (streaming); `deployment` selects the hosted model
    async fn stream_chat(
        &self,
        request: ChatRequest,
        deployment: &str,
    ) -> Result<TextStream, ApiError>;

    /// generate embeddings, one vector per input in input order
    async fn embed(&self, inputs: &[String], deployment: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
