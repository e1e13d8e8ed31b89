use std::sync::Arc;

use async_trait::async_trait;

use super::context_builder::{build_system_prompt, ContextBuilderConfig, RAGContextBuilder};
use super::embedder::{build_embedder, Embedder};
use super::engine::{RAGConfig, RAGEngine};
use super::loader::{load_document, DocumentUpload};
use super::store::{InMemoryVectorStore, StoredChunk, VectorStore};
use crate::core::config::RagSettings;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, LlmService, TextStream};
use crate::session::{Message, Session, SourceDescriptor, SourceKind};

/// Chunks of one source with their embeddings, not yet part of any session.
pub struct PreparedSource {
    pub source: SourceDescriptor,
    pub items: Vec<(StoredChunk, Vec<f32>)>,
}

/// Ingestion and answer generation for a chat session.
///
/// Ingestion is split so the slow part never needs the session: callers
/// check the session, run `ingest_document` / `ingest_url` unlocked, then
/// hand the result to `attach_source` under the session lock.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Rejects a source name the session already has or has no room for.
    fn check_new_source(&self, session: &Session, name: &str) -> Result<(), ApiError>;

    /// Extracts, chunks and embeds an uploaded document.
    async fn ingest_document(&self, upload: DocumentUpload) -> Result<PreparedSource, ApiError>;

    /// Same as `ingest_document` for the readable content of a web page.
    async fn ingest_url(&self, url: &str) -> Result<PreparedSource, ApiError>;

    /// Re-checks the session, stores the chunks in its vector store (created
    /// on first success) and records the source.
    async fn attach_source(
        &self,
        session: &mut Session,
        prepared: PreparedSource,
    ) -> Result<SourceDescriptor, ApiError>;

    /// Streams a model answer to `messages` with no retrieval.
    async fn plain_response(
        &self,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<TextStream, ApiError>;

    /// Streams a model answer grounded on passages retrieved from `store`.
    async fn augmented_response(
        &self,
        store: Arc<dyn VectorStore>,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<TextStream, ApiError>;
}

pub struct DefaultRetrievalBackend {
    llm: LlmService,
    engine: RAGEngine,
    embedder: Box<dyn Embedder>,
    context_builder: RAGContextBuilder,
    max_sources: usize,
    system_prompt: String,
}

impl DefaultRetrievalBackend {
    pub fn new(llm: LlmService, settings: &RagSettings) -> Result<Self, ApiError> {
        let embedder = build_embedder(settings, &llm);
        Self::with_embedder(llm, settings, embedder)
    }

    pub fn with_embedder(
        llm: LlmService,
        settings: &RagSettings,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, ApiError> {
        tracing::info!(embedder = embedder.name(), "Retrieval backend ready");
        Ok(Self {
            llm,
            engine: RAGEngine::new(RAGConfig::from(settings))?,
            embedder,
            context_builder: RAGContextBuilder::new(ContextBuilderConfig::from(settings)),
            max_sources: settings.max_sources,
            system_prompt: settings.system_prompt.clone(),
        })
    }

    async fn prepare_text(
        &self,
        name: &str,
        kind: SourceKind,
        text: &str,
    ) -> Result<PreparedSource, ApiError> {
        let chunks = self.engine.split_into_chunks(text, name);
        if chunks.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No text could be extracted from {}",
                name
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(ApiError::Upstream(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let source = SourceDescriptor::new(name, kind, chunks.len());
        let items: Vec<(StoredChunk, Vec<f32>)> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let stored = StoredChunk {
                    chunk_id: format!("{}:{}", source.id, chunk.chunk_index),
                    content: chunk.text,
                    source: chunk.source,
                    source_id: source.id,
                    chunk_index: chunk.chunk_index,
                    start_offset: chunk.start_offset,
                };
                (stored, embedding)
            })
            .collect();

        Ok(PreparedSource { source, items })
    }
}

#[async_trait]
impl RetrievalBackend for DefaultRetrievalBackend {
    fn check_new_source(&self, session: &Session, name: &str) -> Result<(), ApiError> {
        if session.has_source(name) {
            return Err(ApiError::Conflict(format!(
                "Source '{}' has already been added",
                name
            )));
        }
        if session.sources().len() >= self.max_sources {
            return Err(ApiError::BadRequest(format!(
                "Maximum number of documents reached ({}).",
                self.max_sources
            )));
        }
        Ok(())
    }

    async fn ingest_document(&self, upload: DocumentUpload) -> Result<PreparedSource, ApiError> {
        let name = upload.source_name();
        if name.is_empty() {
            return Err(ApiError::BadRequest("Filename is required".to_string()));
        }

        let text = tokio::task::spawn_blocking(move || load_document(&upload))
            .await
            .map_err(ApiError::internal)??;

        self.prepare_text(&name, SourceKind::Document, &text).await
    }

    async fn ingest_url(&self, url: &str) -> Result<PreparedSource, ApiError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ApiError::BadRequest("URL is required".to_string()));
        }

        let text = self.engine.fetch_url_text(url).await?;
        self.prepare_text(url, SourceKind::Url, &text).await
    }

    async fn attach_source(
        &self,
        session: &mut Session,
        prepared: PreparedSource,
    ) -> Result<SourceDescriptor, ApiError> {
        let PreparedSource { source, items } = prepared;
        // Another ingestion may have finished while this one was unlocked.
        self.check_new_source(session, &source.name)?;

        // A new store only reaches the session once the insert succeeded.
        let store = session
            .vector_store()
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));
        store.insert_batch(items).await?;
        session.record_source(source.clone(), store);

        tracing::info!(
            session_id = %session.id(),
            source = %source.name,
            chunks = source.chunk_count,
            "Source ingested"
        );
        Ok(source)
    }

    async fn plain_response(
        &self,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<TextStream, ApiError> {
        let messages = messages.iter().map(ChatMessage::from).collect();
        self.llm.stream_chat(model, messages).await
    }

    async fn augmented_response(
        &self,
        store: Arc<dyn VectorStore>,
        model: &str,
        messages: Vec<Message>,
    ) -> Result<TextStream, ApiError> {
        let query = messages
            .last()
            .map(|m| m.content.clone())
            .ok_or_else(|| ApiError::BadRequest("No message to answer".to_string()))?;

        let query_embedding = self
            .embedder
            .embed(&[query])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("No embedding returned for query".to_string()))?;

        let results = store
            .search(&query_embedding, self.context_builder.config().top_k)
            .await?;
        let context = self.context_builder.build_context(&results);
        tracing::debug!(
            retrieved = results.len(),
            sources = ?self.context_builder.get_sources(&context),
            "Context built for augmented response"
        );

        let mut chat_messages = Vec::with_capacity(messages.len() + 1);
        chat_messages.push(ChatMessage::system(build_system_prompt(
            &self.system_prompt,
            &context,
        )));
        chat_messages.extend(messages.iter().map(ChatMessage::from));

        self.llm.stream_chat(model, chat_messages).await
    }
}
