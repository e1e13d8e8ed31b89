pub mod azure;
pub mod provider;
pub mod service;
pub mod types;

pub use azure::AzureOpenAiProvider;
pub use provider::LlmProvider;
pub use service::LlmService;
pub use types::{ChatMessage, ChatRequest, TextStream};
