use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::protocol::{WsConnectQuery, WsIncomingMessage};
use crate::core::errors::ApiError;
use crate::server::handlers::utils::parse_session_id;
use crate::server::router::allowed_origins;
use crate::session::SessionHandle;
use crate::state::AppState;

type WsSender = SplitSink<WebSocket, Message>;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsConnectQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let origin_ok = validate_origin(&headers, &state);
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.session_id, origin_ok))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    requested_session: Option<String>,
    origin_ok: bool,
) {
    let (mut sender, mut receiver) = socket.split();

    if !origin_ok {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4003,
                reason: "Forbidden: Invalid Origin".into(),
            })))
            .await;
        return;
    }

    let (session_id, session, owned) = match attach_session(&state, requested_session).await {
        Ok(attached) => attached,
        Err(err) => {
            let _ = send_error(&mut sender, &err).await;
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: 4004,
                    reason: "Session not found".into(),
                })))
                .await;
            return;
        }
    };

    if send_session(&mut sender, &session).await.is_err()
        || send_history(&mut sender, &session).await.is_err()
    {
        release_session(&state, session_id, owned).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Result<WsIncomingMessage, String>>();
    let (stop_tx, mut stop_rx) = watch::channel(0u64);

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(incoming) if incoming.is_stop() => stop_tx.send_modify(|n| *n += 1),
                    Ok(incoming) => {
                        if tx.send(Ok(incoming)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(format!("Invalid message: {}", err)));
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let mut reader_open = true;
    loop {
        tokio::select! {
            incoming = rx.recv() => {
                let Some(incoming) = incoming else { break };
                let result = match incoming {
                    Ok(data) => handle_message(&mut sender, &state, &session, data, &mut stop_rx).await,
                    Err(message) => Err(ApiError::BadRequest(message)),
                };
                if let Err(err) = result {
                    if send_error(&mut sender, &err).await.is_err() {
                        break;
                    }
                }
            }
            changed = stop_rx.changed(), if reader_open => {
                if changed.is_err() {
                    reader_open = false;
                    continue;
                }
                // Nothing is streaming; acknowledge anyway.
                if send_json(&mut sender, json!({"type": "stopped"})).await.is_err() {
                    break;
                }
            }
        }
    }

    reader.abort();
    release_session(&state, session_id, owned).await;
}

/// Resolves the socket's session and pins it while the socket is open.
/// Without an id a private session is created and removed again when the
/// socket closes.
async fn attach_session(
    state: &Arc<AppState>,
    requested: Option<String>,
) -> Result<(Uuid, SessionHandle, bool), ApiError> {
    match requested.filter(|id| !id.trim().is_empty()) {
        Some(raw) => {
            let id = parse_session_id(&raw)?;
            let handle = state
                .sessions
                .attach(&id)
                .await
                .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
            Ok((id, handle, false))
        }
        None => {
            let (id, _) = state.sessions.create(state.llm.default_model()).await;
            let handle = state
                .sessions
                .attach(&id)
                .await
                .ok_or_else(|| ApiError::Internal("Session vanished after creation".to_string()))?;
            Ok((id, handle, true))
        }
    }
}

async fn release_session(state: &Arc<AppState>, session_id: Uuid, owned: bool) {
    if owned {
        state.sessions.remove(&session_id).await;
    } else {
        state.sessions.detach(&session_id).await;
    }
    tracing::debug!(session_id = %session_id, "WebSocket closed");
}

async fn handle_message(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    session: &SessionHandle,
    data: WsIncomingMessage,
    stop_rx: &mut watch::Receiver<u64>,
) -> Result<(), ApiError> {
    match data.msg_type.as_deref().unwrap_or("") {
        "message" => {
            let text = data.message.unwrap_or_default();
            stream_answer(sender, state, session, &text, stop_rx).await
        }
        "clear" => {
            state.orchestrator.clear(session).await;
            send_json(sender, json!({"type": "cleared"})).await
        }
        "set_rag" => {
            let enabled = data
                .enabled
                .ok_or_else(|| ApiError::BadRequest("Field 'enabled' is required".to_string()))?;
            let effective = state.orchestrator.toggle_retrieval(session, enabled).await;
            let available = session.lock().await.has_vector_store();
            send_json(
                sender,
                json!({"type": "rag_state", "enabled": effective, "available": available}),
            )
            .await
        }
        "get_history" => send_history(sender, session).await,
        other => Err(ApiError::BadRequest(format!(
            "Unknown message type: {}",
            other
        ))),
    }
}

enum StreamEnd {
    Done,
    Stopped,
    Disconnected,
}

async fn stream_answer(
    sender: &mut WsSender,
    state: &Arc<AppState>,
    session: &SessionHandle,
    text: &str,
    stop_rx: &mut watch::Receiver<u64>,
) -> Result<(), ApiError> {
    let mut stream = state.orchestrator.submit(session, text).await?;
    let mode = stream.mode();
    stop_rx.borrow_and_update();

    let end = loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                break if changed.is_ok() { StreamEnd::Stopped } else { StreamEnd::Disconnected };
            }
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    send_json(
                        sender,
                        json!({"type": "chunk", "message": chunk, "mode": mode.as_str()}),
                    )
                    .await?;
                }
                Some(Err(err)) => return Err(err),
                None => break StreamEnd::Done,
            },
        }
    };

    // Dropping the stream cancels the provider request and discards the answer.
    drop(stream);
    match end {
        StreamEnd::Done => send_json(sender, json!({"type": "done", "mode": mode.as_str()})).await,
        StreamEnd::Stopped => send_json(sender, json!({"type": "stopped"})).await,
        StreamEnd::Disconnected => Ok(()),
    }
}

async fn send_session(sender: &mut WsSender, session: &SessionHandle) -> Result<(), ApiError> {
    let payload = {
        let session = session.lock().await;
        json!({
            "type": "session",
            "session_id": session.id(),
            "model": session.model(),
            "use_rag": session.use_rag(),
            "rag_available": session.has_vector_store(),
        })
    };
    send_json(sender, payload).await
}

async fn send_history(sender: &mut WsSender, session: &SessionHandle) -> Result<(), ApiError> {
    let messages = serde_json::to_value(session.lock().await.messages()).map_err(ApiError::internal)?;
    send_json(sender, json!({"type": "history", "messages": messages})).await
}

async fn send_error(sender: &mut WsSender, err: &ApiError) -> Result<(), ApiError> {
    if err.status().is_server_error() {
        tracing::warn!("WebSocket request failed: {}", err);
    }
    send_json(sender, json!({"type": "error", "message": err.client_message()})).await
}

pub async fn send_json(sender: &mut WsSender, payload: Value) -> Result<(), ApiError> {
    let text = serde_json::to_string(&payload).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}

/// Browsers always send `Origin`; other clients are not subject to CORS.
fn validate_origin(headers: &HeaderMap, state: &AppState) -> bool {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };

    if let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        if origin == format!("http://{}", host) || origin == format!("https://{}", host) {
            return true;
        }
    }

    allowed_origins(&state.settings.server)
        .iter()
        .any(|allowed| origin == allowed || origin.starts_with(&format!("{}/", allowed)))
}
