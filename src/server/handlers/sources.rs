use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::DocumentUpload;
use crate::server::handlers::utils::find_session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddUrlRequest {
    pub url: String,
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    let session = handle.lock().await;
    Ok(Json(json!({
        "sources": session.sources(),
        "use_rag": session.use_rag(),
        "rag_available": session.has_vector_store(),
    })))
}

pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let filename = query
        .filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'filename' is required".to_string()))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("Uploaded document is empty".to_string()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let upload = DocumentUpload::new(filename, body.to_vec()).with_content_type(content_type);

    let handle = find_session(&state, &session_id).await?;
    let source = state.orchestrator.ingest_document(&handle, upload).await?;
    let use_rag = handle.lock().await.use_rag();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "source": source, "use_rag": use_rag })),
    ))
}

pub async fn add_url(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<AddUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = find_session(&state, &session_id).await?;
    let source = state.orchestrator.ingest_url(&handle, &payload.url).await?;
    let use_rag = handle.lock().await.use_rag();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "source": source, "use_rag": use_rag })),
    ))
}
