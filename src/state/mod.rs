use std::sync::Arc;

use crate::chat::ChatOrchestrator;
use crate::core::config::{AppPaths, AppSettings, ConfigService};
use crate::llm::{AzureOpenAiProvider, LlmProvider, LlmService};
use crate::rag::DefaultRetrievalBackend;
use crate::session::SessionManager;

pub mod error;

use error::InitializationError;

/// Global application state shared across all routes and background tasks.
///
/// Contains references to:
/// - Configuration
/// - The LLM service and its provider
/// - The session registry
/// - The chat orchestrator wired to the retrieval backend
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigService,
    pub settings: Arc<AppSettings>,
    pub llm: LlmService,
    pub sessions: SessionManager,
    pub orchestrator: ChatOrchestrator,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// This process includes:
    /// 1. Loading and validating configuration
    /// 2. Building the Azure OpenAI provider from settings and environment
    /// 3. Wiring the retrieval backend and chat orchestrator
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths);
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let provider = AzureOpenAiProvider::new(&settings.llm)
            .map_err(|e| InitializationError::Llm(e.into()))?;
        if !provider.is_configured() {
            tracing::warn!(
                "Azure OpenAI endpoint or API key missing; chat requests will fail until configured"
            );
        }

        Self::from_parts(config, settings, Arc::new(provider))
    }

    /// Builds the state around an already constructed provider.
    pub fn from_parts(
        config: ConfigService,
        settings: AppSettings,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Arc<Self>, InitializationError> {
        let llm = LlmService::new(provider, settings.llm.clone());
        let backend = DefaultRetrievalBackend::new(llm.clone(), &settings.rag)
            .map_err(|e| InitializationError::Rag(e.into()))?;
        let orchestrator = ChatOrchestrator::new(Arc::new(backend), settings.chat.clone());

        tracing::info!(
            provider = llm.provider_name(),
            models = llm.models().len(),
            embedder = ?settings.rag.embedder,
            "Application state initialized"
        );

        Ok(Arc::new(AppState {
            config,
            settings: Arc::new(settings),
            llm,
            sessions: SessionManager::new(),
            orchestrator,
        }))
    }
}
