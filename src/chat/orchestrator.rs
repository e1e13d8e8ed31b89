use std::sync::Arc;

use super::stream::{ResponseMode, ResponseStream};
use crate::core::config::ChatSettings;
use crate::core::errors::ApiError;
use crate::rag::{DocumentUpload, PreparedSource, RetrievalBackend};
use crate::session::{Message, SessionHandle, SourceDescriptor};

/// Drives a chat session: records turns, routes prompts to the plain or
/// retrieval-augmented path and manages ingestion side effects.
#[derive(Clone)]
pub struct ChatOrchestrator {
    backend: Arc<dyn RetrievalBackend>,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(backend: Arc<dyn RetrievalBackend>, settings: ChatSettings) -> Self {
        Self { backend, settings }
    }

    fn validate_prompt(&self, prompt: &str) -> Result<(), ApiError> {
        if prompt.trim().is_empty() {
            return Err(ApiError::BadRequest("Message must not be empty".to_string()));
        }
        if prompt.chars().count() > self.settings.max_input_length {
            return Err(ApiError::BadRequest(format!(
                "Message exceeds {} characters",
                self.settings.max_input_length
            )));
        }
        Ok(())
    }

    /// Appends the user turn and starts the answer stream.
    ///
    /// The model only sees the new message. The path is decided here, so
    /// toggling retrieval later does not affect this response.
    pub async fn submit(
        &self,
        session: &SessionHandle,
        prompt: &str,
    ) -> Result<ResponseStream, ApiError> {
        self.validate_prompt(prompt)?;

        let (session_id, model, epoch, store) = {
            let mut guard = session.lock().await;
            guard.push_message(Message::user(prompt));
            let store = if guard.use_rag() {
                guard.vector_store()
            } else {
                None
            };
            (guard.id(), guard.model().to_string(), guard.epoch(), store)
        };

        let messages = vec![Message::user(prompt)];
        let (mode, stream) = match store {
            Some(store) => (
                ResponseMode::Rag,
                self.backend
                    .augmented_response(store, &model, messages)
                    .await?,
            ),
            None => (
                ResponseMode::Chat,
                self.backend.plain_response(&model, messages).await?,
            ),
        };

        tracing::info!(
            session_id = %session_id,
            model = %model,
            mode = mode.as_str(),
            "Response started"
        );
        Ok(ResponseStream::new(session.clone(), epoch, mode, stream))
    }

    /// Empties the history. Sources, store and retrieval flag are kept.
    pub async fn clear(&self, session: &SessionHandle) {
        let mut guard = session.lock().await;
        guard.clear_messages();
        tracing::info!(session_id = %guard.id(), "History cleared");
    }

    /// Returns the effective flag; stays off while nothing has been ingested.
    pub async fn toggle_retrieval(&self, session: &SessionHandle, enabled: bool) -> bool {
        let mut guard = session.lock().await;
        let effective = guard.set_use_rag(enabled);
        tracing::debug!(session_id = %guard.id(), use_rag = effective, "Retrieval toggled");
        effective
    }

    /// The session stays unlocked while the document is extracted and
    /// embedded, so chat on the same session is not held up.
    pub async fn ingest_document(
        &self,
        session: &SessionHandle,
        upload: DocumentUpload,
    ) -> Result<SourceDescriptor, ApiError> {
        self.check_new_source(session, &upload.source_name()).await?;
        let prepared = self.backend.ingest_document(upload).await?;
        self.attach_source(session, prepared).await
    }

    pub async fn ingest_url(
        &self,
        session: &SessionHandle,
        url: &str,
    ) -> Result<SourceDescriptor, ApiError> {
        self.check_new_source(session, url.trim()).await?;
        let prepared = self.backend.ingest_url(url).await?;
        self.attach_source(session, prepared).await
    }

    async fn check_new_source(&self, session: &SessionHandle, name: &str) -> Result<(), ApiError> {
        let guard = session.lock().await;
        self.backend.check_new_source(&*guard, name)
    }

    async fn attach_source(
        &self,
        session: &SessionHandle,
        prepared: PreparedSource,
    ) -> Result<SourceDescriptor, ApiError> {
        let mut guard = session.lock().await;
        let had_store = guard.has_vector_store();
        let source = self.backend.attach_source(&mut *guard, prepared).await?;
        if !had_store && guard.has_vector_store() {
            guard.set_use_rag(true);
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use std::time::Duration;

    use tokio::sync::{mpsc, Notify};
    use uuid::Uuid;

    use super::*;
    use crate::llm::TextStream;
    use crate::rag::{InMemoryVectorStore, VectorStore};
    use crate::session::{Session, SourceKind, GREETING_REPLY};

    type Sender = mpsc::Sender<Result<String, ApiError>>;

    #[derive(Default)]
    struct MockBackend {
        fragments: Vec<&'static str>,
        fail_stream: bool,
        fail_call: bool,
        hold_open: bool,
        ingest_gate: Option<Arc<Notify>>,
        open: Mutex<Vec<Sender>>,
        calls: Mutex<Vec<(ResponseMode, Vec<Message>)>>,
    }

    impl MockBackend {
        fn replying(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                ..Self::default()
            }
        }

        fn respond(&self, mode: ResponseMode, messages: Vec<Message>) -> Result<TextStream, ApiError> {
            self.calls.lock().unwrap().push((mode, messages));
            if self.fail_call {
                return Err(ApiError::Unconfigured("missing credentials".to_string()));
            }
            let (tx, rx) = mpsc::channel(32);
            for fragment in &self.fragments {
                tx.try_send(Ok(fragment.to_string())).unwrap();
            }
            if self.fail_stream {
                tx.try_send(Err(ApiError::Upstream("boom".to_string()))).unwrap();
            }
            if self.hold_open {
                self.open.lock().unwrap().push(tx);
            }
            Ok(rx)
        }

        fn close_streams(&self) {
            self.open.lock().unwrap().clear();
        }
    }

    fn prepared(name: &str, kind: SourceKind) -> PreparedSource {
        PreparedSource {
            source: SourceDescriptor::new(name, kind, 0),
            items: Vec::new(),
        }
    }

    #[async_trait]
    impl RetrievalBackend for MockBackend {
        fn check_new_source(&self, session: &Session, name: &str) -> Result<(), ApiError> {
            if session.has_source(name) {
                return Err(ApiError::Conflict(name.to_string()));
            }
            Ok(())
        }

        async fn ingest_document(&self, upload: DocumentUpload) -> Result<PreparedSource, ApiError> {
            if upload.filename == "bad.txt" {
                return Err(ApiError::BadRequest("unreadable".to_string()));
            }
            Ok(prepared(&upload.filename, SourceKind::Document))
        }

        async fn ingest_url(&self, url: &str) -> Result<PreparedSource, ApiError> {
            if let Some(gate) = &self.ingest_gate {
                gate.notified().await;
            }
            Ok(prepared(url, SourceKind::Url))
        }

        async fn attach_source(
            &self,
            session: &mut Session,
            prepared: PreparedSource,
        ) -> Result<SourceDescriptor, ApiError> {
            self.check_new_source(session, &prepared.source.name)?;
            let store = session
                .vector_store()
                .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));
            session.record_source(prepared.source.clone(), store);
            Ok(prepared.source)
        }

        async fn plain_response(
            &self,
            _model: &str,
            messages: Vec<Message>,
        ) -> Result<TextStream, ApiError> {
            self.respond(ResponseMode::Chat, messages)
        }

        async fn augmented_response(
            &self,
            _store: Arc<dyn VectorStore>,
            _model: &str,
            messages: Vec<Message>,
        ) -> Result<TextStream, ApiError> {
            self.respond(ResponseMode::Rag, messages)
        }
    }

    fn setup(backend: MockBackend) -> (ChatOrchestrator, Arc<MockBackend>, SessionHandle) {
        let backend = Arc::new(backend);
        let orchestrator = ChatOrchestrator::new(backend.clone(), ChatSettings::default());
        let session = Arc::new(tokio::sync::Mutex::new(Session::new(
            Uuid::new_v4(),
            "azure-openai/gpt-35-turbo",
        )));
        (orchestrator, backend, session)
    }

    #[tokio::test]
    async fn each_turn_appends_user_and_assistant_messages() {
        let (orchestrator, _, session) = setup(MockBackend::replying(vec!["Hello", " world"]));

        for turn in 0..3 {
            let stream = orchestrator
                .submit(&session, &format!("question {}", turn))
                .await
                .expect("submit");
            assert_eq!(stream.collect().await.expect("collect"), "Hello world");
        }

        let guard = session.lock().await;
        let messages = guard.messages();
        assert_eq!(messages.len(), 2 * 3 + 2);
        assert_eq!(messages[1], Message::assistant(GREETING_REPLY));
        assert_eq!(messages[6], Message::user("question 2"));
        assert_eq!(messages[7], Message::assistant("Hello world"));
    }

    #[tokio::test]
    async fn only_the_new_message_is_sent() {
        let (orchestrator, backend, session) = setup(MockBackend::replying(vec!["ok"]));

        for prompt in ["first", "second"] {
            let stream = orchestrator.submit(&session, prompt).await.expect("submit");
            assert_eq!(stream.mode(), ResponseMode::Chat);
            stream.collect().await.expect("collect");
        }

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[1], (ResponseMode::Chat, vec![Message::user("second")]));
    }

    #[tokio::test]
    async fn retrieval_path_follows_flag_at_submit_time() {
        let (orchestrator, backend, session) = setup(MockBackend::replying(vec!["ok"]));

        assert!(!orchestrator.toggle_retrieval(&session, true).await);

        orchestrator
            .ingest_document(&session, DocumentUpload::new("notes.txt", b"x".to_vec()))
            .await
            .expect("ingest");
        assert!(session.lock().await.use_rag());

        let stream = orchestrator.submit(&session, "with docs").await.expect("submit");
        assert_eq!(stream.mode(), ResponseMode::Rag);
        // Toggling after submit does not change the running response.
        assert!(!orchestrator.toggle_retrieval(&session, false).await);
        stream.collect().await.expect("collect");

        let stream = orchestrator.submit(&session, "without").await.expect("submit");
        assert_eq!(stream.mode(), ResponseMode::Chat);
        stream.collect().await.expect("collect");

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].0, ResponseMode::Rag);
        assert_eq!(calls[1].0, ResponseMode::Chat);
    }

    #[tokio::test]
    async fn later_ingestion_keeps_user_choice() {
        let (orchestrator, _, session) = setup(MockBackend::default());

        orchestrator
            .ingest_url(&session, "https://example.com")
            .await
            .expect("ingest");
        assert!(!orchestrator.toggle_retrieval(&session, false).await);

        orchestrator
            .ingest_document(&session, DocumentUpload::new("more.txt", b"y".to_vec()))
            .await
            .expect("ingest");

        let guard = session.lock().await;
        assert!(!guard.use_rag());
        assert_eq!(guard.sources().len(), 2);
    }

    #[tokio::test]
    async fn failed_ingestion_does_not_enable_retrieval() {
        let (orchestrator, _, session) = setup(MockBackend::default());

        let err = orchestrator
            .ingest_document(&session, DocumentUpload::new("bad.txt", Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        let guard = session.lock().await;
        assert!(!guard.use_rag());
        assert!(!guard.has_vector_store());
    }

    #[tokio::test]
    async fn stream_error_appends_no_assistant_message() {
        let (orchestrator, _, session) = setup(MockBackend {
            fragments: vec!["partial"],
            fail_stream: true,
            ..MockBackend::default()
        });

        let stream = orchestrator.submit(&session, "q").await.expect("submit");
        assert!(matches!(stream.collect().await, Err(ApiError::Upstream(_))));

        let guard = session.lock().await;
        assert_eq!(guard.messages().len(), 3);
        assert_eq!(guard.messages()[2], Message::user("q"));
    }

    #[tokio::test]
    async fn backend_failure_keeps_user_message() {
        let (orchestrator, _, session) = setup(MockBackend {
            fail_call: true,
            ..MockBackend::default()
        });

        let err = orchestrator.submit(&session, "q").await.err().expect("error");
        assert!(matches!(err, ApiError::Unconfigured(_)));
        assert_eq!(session.lock().await.messages().len(), 3);
    }

    #[tokio::test]
    async fn dropping_stream_early_appends_nothing() {
        let (orchestrator, backend, session) = setup(MockBackend {
            fragments: vec!["one", "two"],
            hold_open: true,
            ..MockBackend::default()
        });

        let mut stream = orchestrator.submit(&session, "q").await.expect("submit");
        assert_eq!(stream.next().await.expect("fragment").expect("ok"), "one");
        drop(stream);
        backend.close_streams();

        assert_eq!(session.lock().await.messages().len(), 3);
    }

    #[tokio::test]
    async fn clear_during_stream_discards_response() {
        let (orchestrator, backend, session) = setup(MockBackend {
            fragments: vec!["late answer"],
            hold_open: true,
            ..MockBackend::default()
        });

        let mut stream = orchestrator.submit(&session, "q").await.expect("submit");
        assert_eq!(stream.next().await.expect("fragment").expect("ok"), "late answer");

        orchestrator.clear(&session).await;
        backend.close_streams();
        assert!(stream.next().await.is_none());

        let guard = session.lock().await;
        assert!(guard.messages().is_empty());
        assert_eq!(guard.epoch(), 1);
    }

    #[tokio::test]
    async fn invalid_prompts_leave_history_unchanged() {
        let backend = Arc::new(MockBackend::default());
        let orchestrator = ChatOrchestrator::new(
            backend,
            ChatSettings {
                max_input_length: 5,
            },
        );
        let session = Arc::new(tokio::sync::Mutex::new(Session::new(Uuid::new_v4(), "m")));

        for prompt in ["", "   ", "too long prompt"] {
            let err = orchestrator.submit(&session, prompt).await.err().expect("error");
            assert!(matches!(err, ApiError::BadRequest(_)));
        }
        assert_eq!(session.lock().await.messages().len(), 2);
    }

    #[tokio::test]
    async fn chat_continues_while_a_url_is_ingested() {
        let gate = Arc::new(Notify::new());
        let (orchestrator, _, session) = setup(MockBackend {
            fragments: vec!["still here"],
            ingest_gate: Some(gate.clone()),
            ..MockBackend::default()
        });

        let ingestion = {
            let orchestrator = orchestrator.clone();
            let session = session.clone();
            tokio::spawn(async move { orchestrator.ingest_url(&session, "https://example.com").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stream = tokio::time::timeout(Duration::from_secs(1), orchestrator.submit(&session, "q"))
            .await
            .expect("submit is not blocked by ingestion")
            .expect("submit");
        assert_eq!(stream.collect().await.expect("collect"), "still here");
        orchestrator.clear(&session).await;

        gate.notify_one();
        let source = ingestion.await.expect("join").expect("ingest");

        let guard = session.lock().await;
        assert_eq!(guard.sources(), &[source]);
        assert!(guard.use_rag());
        assert!(guard.messages().is_empty());
    }

    #[tokio::test]
    async fn duplicate_source_is_rejected_before_ingesting() {
        let (orchestrator, _, session) = setup(MockBackend::default());
        orchestrator
            .ingest_url(&session, "https://example.com")
            .await
            .expect("first");

        let err = orchestrator
            .ingest_url(&session, " https://example.com ")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(session.lock().await.sources().len(), 1);
    }
}
