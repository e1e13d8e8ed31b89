use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::session::{Session, SessionHandle};
use crate::state::AppState;

pub fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("Invalid session id: {}", raw)))
}

pub async fn find_session(state: &Arc<AppState>, raw_id: &str) -> Result<SessionHandle, ApiError> {
    let id = parse_session_id(raw_id)?;
    state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
}

pub fn session_view(session: &Session) -> Value {
    json!({
        "id": session.id(),
        "model": session.model(),
        "use_rag": session.use_rag(),
        "rag_available": session.has_vector_store(),
        "sources": session.sources(),
        "messages": session.messages(),
        "created_at": session.created_at().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_must_be_uuids() {
        let id = Uuid::new_v4();
        assert_eq!(parse_session_id(&id.to_string()).expect("parse"), id);
        assert!(matches!(
            parse_session_id("default"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn view_exposes_flags_and_history() {
        let session = Session::new(Uuid::new_v4(), "azure-openai/gpt-35-turbo");
        let view = session_view(&session);

        assert_eq!(view["model"], "azure-openai/gpt-35-turbo");
        assert_eq!(view["use_rag"], false);
        assert_eq!(view["rag_available"], false);
        assert_eq!(view["messages"][0]["role"], "user");
        assert_eq!(view["messages"][0]["content"], "Hello");
        assert_eq!(view["sources"].as_array().map(Vec::len), Some(0));
    }
}
