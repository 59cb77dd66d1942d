use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Manages all connected clients and routes events to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for presence events. Every connected client
    /// receives these regardless of conversation membership.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: user_id -> display name
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender).
    /// conn_id distinguishes a live connection from a stale one that the
    /// same user already replaced by reconnecting.
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to presence broadcasts. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A reconnecting user replaces their old channel here, which is what
    /// strands the previous connection's receiver.
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Deliver an event to every listed member that currently has a live
    /// connection. Members without one simply miss the event and catch up
    /// from the log on their next fetch.
    pub async fn fan_out(&self, member_ids: &[Uuid], event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        for member_id in member_ids {
            if let Some((_, tx)) = channels.get(member_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Register a user as online.
    pub async fn user_online(&self, user_id: Uuid, display_name: String) {
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, display_name.clone());

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            display_name,
            online: true,
            last_seen: None,
        });
    }

    /// Register a user as offline. Returns whether this call actually took
    /// effect: a stale conn_id (the user reconnected meanwhile) is ignored
    /// so the new connection's presence survives the old one's teardown.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut channels = self.inner.user_channels.write().await;
        match channels.get(&user_id) {
            Some((current, _)) if *current == conn_id => {
                channels.remove(&user_id);
            }
            _ => return false,
        }
        drop(channels);

        let display_name = self
            .inner
            .online_users
            .write()
            .await
            .remove(&user_id)
            .unwrap_or_default();

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            display_name,
            online: false,
            last_seen: Some(Utc::now()),
        });

        true
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
