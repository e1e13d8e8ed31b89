//! Per-connection chat session state.
//!
//! A `Session` is the explicit context object handed to every chat and
//! ingestion operation; there is no global state.

mod manager;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::ChatMessage;
use crate::rag::VectorStore;

pub use manager::{SessionHandle, SessionManager};

pub const GREETING_PROMPT: &str = "Hello";
pub const GREETING_REPLY: &str = "Hi there! How can I assist you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        ChatMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Document,
    Url,
}

/// An ingested document or URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: Uuid,
    pub name: String,
    pub kind: SourceKind,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, kind: SourceKind, chunk_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            chunk_count,
            ingested_at: Utc::now(),
        }
    }
}

pub struct Session {
    id: Uuid,
    model: String,
    created_at: DateTime<Utc>,
    sources: Vec<SourceDescriptor>,
    use_rag: bool,
    messages: Vec<Message>,
    vector_store: Option<Arc<dyn VectorStore>>,
    epoch: u64,
}

impl Session {
    /// New session with the two greeting messages seeded.
    pub fn new(id: Uuid, model: impl Into<String>) -> Self {
        Self {
            id,
            model: model.into(),
            created_at: Utc::now(),
            sources: Vec::new(),
            use_rag: false,
            messages: vec![
                Message::user(GREETING_PROMPT),
                Message::assistant(GREETING_REPLY),
            ],
            vector_store: None,
            epoch: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn sources(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name == name)
    }

    pub fn use_rag(&self) -> bool {
        self.use_rag
    }

    pub fn has_vector_store(&self) -> bool {
        self.vector_store.is_some()
    }

    pub fn vector_store(&self) -> Option<Arc<dyn VectorStore>> {
        self.vector_store.clone()
    }

    /// Incremented by every `clear_messages`.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.epoch += 1;
    }

    /// Sets the retrieval flag; ignored while no vector store exists.
    ///
    /// Returns the effective flag.
    pub fn set_use_rag(&mut self, enabled: bool) -> bool {
        if self.vector_store.is_some() {
            self.use_rag = enabled;
        }
        self.use_rag
    }

    /// Records a successful ingestion and the store that now holds it.
    pub fn record_source(&mut self, source: SourceDescriptor, store: Arc<dyn VectorStore>) {
        self.vector_store = Some(store);
        self.sources.push(source);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("sources", &self.sources.len())
            .field("use_rag", &self.use_rag)
            .field("messages", &self.messages.len())
            .field("has_vector_store", &self.vector_store.is_some())
            .field("epoch", &self.epoch)
            .finish()
    }
}
