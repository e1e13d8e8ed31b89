//! Chat orchestration: turns user prompts into streamed answers and keeps
//! the session history consistent with what the user saw.

mod orchestrator;
mod stream;

pub use orchestrator::ChatOrchestrator;
pub use stream::{ResponseMode, ResponseStream};
