use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::config::ServerSettings;
use crate::server::handlers::{config, health, sessions, sources, ui};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Creates the main application router with all routes and middleware.
///
/// This function sets up:
/// - CORS middleware
/// - Health, model catalog and config endpoints
/// - Session, history, retrieval and ingestion endpoints
/// - WebSocket chat handler and the embedded chat page
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server);
    let upload_limit = DefaultBodyLimit::max(state.settings.rag.max_upload_bytes);

    Router::new()
        .route("/", get(ui::index))
        .route("/health", get(health::health))
        .route("/api/models", get(health::list_models))
        .route("/api/config", get(config::get_config))
        .route("/api/sessions", post(sessions::create_session))
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/messages",
            get(sessions::get_messages).delete(sessions::clear_messages),
        )
        .route("/api/sessions/:session_id/rag", patch(sessions::set_rag))
        .route("/api/sessions/:session_id/model", patch(sessions::set_model))
        .route(
            "/api/sessions/:session_id/sources",
            get(sources::list_sources),
        )
        .route(
            "/api/sessions/:session_id/documents",
            post(sources::upload_document).layer(upload_limit),
        )
        .route("/api/sessions/:session_id/urls", post(sources::add_url))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(settings: &ServerSettings) -> CorsLayer {
    let allow_origin = AllowOrigin::list(
        allowed_origins(settings)
            .into_iter()
            .filter_map(|origin| HeaderValue::from_str(&origin).ok())
            .collect::<Vec<_>>(),
    );

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

/// Configured origins, or local defaults when none are set.
pub fn allowed_origins(settings: &ServerSettings) -> Vec<String> {
    let origins = settings
        .cors_allowed_origins
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.trim_end_matches('/').to_string())
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return default_local_origins(settings.port);
    }

    origins
}

fn default_local_origins(port: u16) -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        format!("http://localhost:{}", port),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        format!("http://127.0.0.1:{}", port),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
