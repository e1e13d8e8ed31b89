use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::server::handlers::utils::{find_session, parse_session_id, session_view};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetRagRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetModelRequest {
    pub model: String,
}

fn resolve_model(state: &AppState, requested: Option<String>) -> Result<String, ApiError> {
    match requested.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()) {
        Some(model) if state.llm.has_model(&model) => Ok(model),
        Some(model) => Err(ApiError::BadRequest(format!("Model not found: {}", model))),
        None => Ok(state.llm.default_model().to_string()),
    }
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.unwrap_or_default();
    let model = resolve_model(&state, payload.model)?;
    let (_, handle) = state.sessions.create(&model).await;
    let view = session_view(&*handle.lock().await);
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    let view = session_view(&*handle.lock().await);
    Ok(Json(view))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_session_id(&session_id)?;
    if !state.sessions.remove(&id).await {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    let session = handle.lock().await;
    Ok(Json(json!({ "messages": session.messages() })))
}

pub async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    state.orchestrator.clear(&handle).await;
    Ok(Json(json!({ "status": "cleared" })))
}

pub async fn set_rag(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SetRagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    let enabled = state
        .orchestrator
        .toggle_retrieval(&handle, payload.enabled)
        .await;
    let available = handle.lock().await.has_vector_store();
    Ok(Json(json!({ "use_rag": enabled, "rag_available": available })))
}

pub async fn set_model(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<SetModelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    let model = resolve_model(&state, Some(payload.model))?;
    handle.lock().await.set_model(model.clone());
    Ok(Json(json!({ "model": model })))
}
