use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct WsConnectQuery {
    pub session_id: Option<String>,
}

/// Client frame. `type` is one of `message`, `stop`, `clear`, `set_rag`
/// and `get_history`.
#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub message: Option<String>,
    pub enabled: Option<bool>,
}

impl WsIncomingMessage {
    pub fn is_stop(&self) -> bool {
        self.msg_type.as_deref() == Some("stop")
    }
}
