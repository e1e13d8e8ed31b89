use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "llm_provider": state.llm.provider_name(),
        "llm_configured": state.llm.is_configured(),
        "sessions": state.sessions.len().await,
    }))
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "models": state.llm.models(),
        "default": state.llm.default_model(),
    }))
}
