use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::Session;

pub type SessionHandle = Arc<Mutex<Session>>;

struct Entry {
    handle: SessionHandle,
    last_active: Instant,
    connections: usize,
}

/// Registry of live sessions. Sessions never share mutable state with
/// each other; each one sits behind its own lock.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, model: &str) -> (Uuid, SessionHandle) {
        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(Session::new(id, model)));
        self.sessions.write().await.insert(
            id,
            Entry {
                handle: handle.clone(),
                last_active: Instant::now(),
                connections: 0,
            },
        );
        tracing::info!(session_id = %id, "Session created");
        (id, handle)
    }

    /// Looks up a session and marks it active.
    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_active = Instant::now();
        Some(entry.handle.clone())
    }

    /// Like `get`, but also pins the session against idle expiry until the
    /// matching `detach`. Used by open WebSocket connections.
    pub async fn attach(&self, id: &Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        entry.connections += 1;
        entry.last_active = Instant::now();
        Some(entry.handle.clone())
    }

    /// Releases one `attach`. The idle clock restarts from now.
    pub async fn detach(&self, id: &Uuid) {
        if let Some(entry) = self.sessions.write().await.get_mut(id) {
            entry.connections = entry.connections.saturating_sub(1);
            entry.last_active = Instant::now();
        }
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops unattached sessions idle for longer than `ttl`. Returns how many
    /// were removed.
    pub async fn remove_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep =
                entry.connections > 0 || now.duration_since(entry.last_active) <= ttl;
            if !keep {
                tracing::info!(session_id = %id, "Session expired");
            }
            keep
        });
        before - sessions.len()
    }

    pub fn spawn_reaper(&self, ttl: Duration, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = manager.remove_idle(ttl).await;
                if removed > 0 {
                    tracing::debug!("Reaped {} idle sessions", removed);
                }
            }
        })
    }
}
