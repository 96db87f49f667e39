use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use qaaq_types::events::GatewayEvent;

/// Live gateway sessions. Presence changes fan out to every session; chat
/// events go to one user's session only.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    presence_tx: broadcast::Sender<GatewayEvent>,
    /// One session per user; the newest connection wins.
    sessions: RwLock<HashMap<Uuid, Session>>,
}

struct Session {
    conn_id: Uuid,
    full_name: String,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                presence_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Presence updates for every user.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.presence_tx.subscribe()
    }

    /// Open a session for `user_id` and return its id and event stream.
    ///
    /// An existing session for the same user is replaced; dropping its
    /// sender ends the older connection. Presence is only announced when
    /// the user was not already online.
    pub async fn connect(&self, user_id: Uuid, full_name: String) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session { conn_id, full_name: full_name.clone(), tx };

        let replaced = self.inner.sessions.write().await.insert(user_id, session);
        match replaced {
            Some(old) => debug!("{} ({}) superseded gateway session {}", full_name, user_id, old.conn_id),
            None => self.announce(user_id, full_name, true),
        }
        (conn_id, rx)
    }

    /// Close a session. Does nothing when a newer session owns the user.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) {
        let removed = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get(&user_id) {
                Some(session) if session.conn_id == conn_id => sessions.remove(&user_id),
                _ => None,
            }
        };

        if let Some(session) = removed {
            self.announce(user_id, session.full_name, false);
        }
    }

    /// Deliver an event to one user. Returns false when they are offline.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&user_id) {
            Some(session) => session.tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (*id, session.full_name.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    fn announce(&self, user_id: Uuid, full_name: String, online: bool) {
        // No receivers just means nobody is connected
        let _ = self.inner.presence_tx.send(GatewayEvent::PresenceUpdate { user_id, full_name, online });
    }
}
