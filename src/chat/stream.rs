use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;
use crate::llm::TextStream;
use crate::session::{Message, SessionHandle};

/// Which path produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Chat,
    Rag,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Chat => "chat",
            ResponseMode::Rag => "rag",
        }
    }
}

/// Single-consumer stream of answer fragments.
///
/// When the underlying stream is exhausted the concatenated text is appended
/// to the session history as one assistant message. An error, an early drop,
/// or a history clear in the meantime appends nothing.
pub struct ResponseStream {
    session: SessionHandle,
    epoch: u64,
    mode: ResponseMode,
    inner: TextStream,
    collected: String,
    finished: bool,
}

impl ResponseStream {
    pub(crate) fn new(session: SessionHandle, epoch: u64, mode: ResponseMode, inner: TextStream) -> Self {
        Self {
            session,
            epoch,
            mode,
            inner,
            collected: String::new(),
            finished: false,
        }
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Next text fragment; `None` once the response is complete.
    pub async fn next(&mut self) -> Option<Result<String, ApiError>> {
        if self.finished {
            return None;
        }

        match self.inner.recv().await {
            Some(Ok(fragment)) => {
                self.collected.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(err)) => {
                self.finished = true;
                tracing::warn!("Response stream failed: {}", err);
                Some(Err(err))
            }
            None => {
                self.finished = true;
                self.commit().await;
                None
            }
        }
    }

    /// Drains the stream and returns the full answer.
    pub async fn collect(mut self) -> Result<String, ApiError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    async fn commit(&mut self) {
        let mut session = self.session.lock().await;
        if session.epoch() != self.epoch {
            tracing::debug!(
                session_id = %session.id(),
                "History cleared while streaming; response discarded"
            );
            return;
        }
        session.push_message(Message::assistant(std::mem::take(&mut self.collected)));
    }
}
