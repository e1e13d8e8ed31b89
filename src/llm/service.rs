use std::sync::Arc;

use crate::core::config::LlmSettings;
use crate::core::errors::ApiError;
use crate::llm::provider::LlmProvider;
use crate::llm::types::{ChatMessage, ChatRequest, TextStream};

/// Resolves model selection and request defaults in front of a provider.
#[derive(Clone)]
pub struct LlmService {
    provider: Arc<dyn LlmProvider>,
    settings: Arc<LlmSettings>,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: LlmSettings) -> Self {
        Self {
            provider,
            settings: Arc::new(settings),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    /// Model ids offered to users, in display order.
    pub fn models(&self) -> &[String] {
        &self.settings.models
    }

    pub fn default_model(&self) -> &str {
        self.settings.default_model()
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.settings.models.iter().any(|m| m == model_id)
    }

    pub async fn stream_chat(
        &self,
        model_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<TextStream, ApiError> {
        if !self.has_model(model_id) {
            return Err(ApiError::BadRequest(format!("Model not found: {}", model_id)));
        }

        let request = ChatRequest::new(messages)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);

        tracing::debug!(
            model = model_id,
            messages = request.messages.len(),
            "Starting streaming chat"
        );
        self.provider
            .stream_chat(request, deployment_for(model_id))
            .await
    }

    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        self.provider
            .embed(inputs, &self.settings.embedding_model)
            .await
    }
}

/// Deployment name sent to the service: the segment after the last `/`.
pub fn deployment_for(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<(String, ChatRequest)>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn stream_chat(
            &self,
            request: ChatRequest,
            deployment: &str,
        ) -> Result<TextStream, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push((deployment.to_string(), request));
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            Ok(rx)
        }

        async fn embed(
            &self,
            inputs: &[String],
            _deployment: &str,
        ) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[test]
    fn deployment_is_last_path_segment() {
        assert_eq!(deployment_for("azure-openai/gpt-35-turbo"), "gpt-35-turbo");
        assert_eq!(deployment_for("gpt-4o"), "gpt-4o");
        assert_eq!(deployment_for("a/b/c"), "c");
    }

    #[tokio::test]
    async fn stream_chat_applies_settings_and_deployment() {
        let provider = Arc::new(RecordingProvider::default());
        let service = LlmService::new(provider.clone(), LlmSettings::default());

        service
            .stream_chat("azure-openai/gpt-35-turbo", vec![ChatMessage::user("hi")])
            .await
            .expect("stream");

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "gpt-35-turbo");
        assert_eq!(calls[0].1.temperature, Some(0.3));
        assert_eq!(calls[0].1.messages, vec![ChatMessage::user("hi")]);
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let service = LlmService::new(
            Arc::new(RecordingProvider::default()),
            LlmSettings::default(),
        );
        let err = service
            .stream_chat("openai/gpt-4o", vec![ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(service.default_model(), "azure-openai/gpt-35-turbo");
    }
}
