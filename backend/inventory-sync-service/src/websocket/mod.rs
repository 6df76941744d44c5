//! Connection manager: session registry, channel fan-out and heartbeats.
//!
//! The registry owns every live session. A session only ever transitions
//! `Connecting -> Open <-> PendingAck -> Closed`; `Closed` is terminal and
//! the session is removed from the registry in the same call that closes it.
//! Only `Open`/`PendingAck` sessions receive traffic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::supervisor::TaskSupervisor;

pub mod dispatch;
pub mod handlers;
pub mod message_types;

pub use dispatch::{DomainHandler, MessageDispatcher};
pub use message_types::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    /// Probed by the heartbeat sweep and not yet acknowledged. Still receives
    /// traffic; pruned if still unacknowledged when the next sweep fires.
    PendingAck,
    Closed,
}

impl SessionState {
    fn receives_traffic(self) -> bool {
        matches!(self, SessionState::Open | SessionState::PendingAck)
    }
}

/// External identity a client may present on connect.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

struct ClientSession {
    user_id: Option<String>,
    session_id: Option<String>,
    channels: HashSet<String>,
    state: SessionState,
    last_ack: DateTime<Utc>,
    tx: UnboundedSender<Message>,
}

impl ClientSession {
    fn push(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, ClientSession>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a connection, create its session and acknowledge it with a
    /// `connection{client_id,status}` envelope.
    pub async fn register(&self, tx: UnboundedSender<Message>, identity: ClientIdentity) -> Uuid {
        let client_id = Uuid::new_v4();
        let mut session = ClientSession {
            user_id: identity.user_id,
            session_id: identity.session_id,
            channels: HashSet::new(),
            state: SessionState::Connecting,
            last_ack: Utc::now(),
            tx,
        };

        let ack = Envelope::connection(client_id, "connected");
        match ack.to_json() {
            Ok(text) => {
                if session.push(Message::Text(text.into())) {
                    session.state = SessionState::Open;
                } else {
                    // Peer vanished during the handshake; nothing to track.
                    tracing::debug!(%client_id, "connection closed before registration ack");
                    return client_id;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "unserializable registration ack");
                return client_id;
            }
        }

        let mut sessions = self.inner.write().await;
        sessions.insert(client_id, session);
        metrics::WS_CONNECTIONS.set(sessions.len() as i64);
        tracing::info!(%client_id, "client connected");
        client_id
    }

    /// Remove a session. Idempotent; used for explicit disconnects.
    pub async fn unregister(&self, client_id: Uuid) {
        let mut sessions = self.inner.write().await;
        if let Some(session) = sessions.get_mut(&client_id) {
            session.state = SessionState::Closed;
        }
        if sessions.remove(&client_id).is_some() {
            tracing::info!(%client_id, "client disconnected");
        }
        metrics::WS_CONNECTIONS.set(sessions.len() as i64);
    }

    pub async fn subscribe(&self, client_id: Uuid, channel: &str) -> AppResult<()> {
        let mut sessions = self.inner.write().await;
        let session = sessions
            .get_mut(&client_id)
            .filter(|s| s.state.receives_traffic())
            .ok_or(AppError::ConnectionGone(client_id))?;
        session.channels.insert(channel.to_string());
        push_envelope(session, &Envelope::subscribed(channel));
        tracing::debug!(%client_id, channel, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, client_id: Uuid, channel: &str) -> AppResult<()> {
        let mut sessions = self.inner.write().await;
        let session = sessions
            .get_mut(&client_id)
            .filter(|s| s.state.receives_traffic())
            .ok_or(AppError::ConnectionGone(client_id))?;
        session.channels.remove(channel);
        push_envelope(session, &Envelope::unsubscribed(channel));
        tracing::debug!(%client_id, channel, "unsubscribed");
        Ok(())
    }

    /// Best-effort single delivery. A closed or errored peer is removed and
    /// reported as `ConnectionGone`; it is never retried.
    pub async fn send(&self, client_id: Uuid, envelope: &Envelope) -> AppResult<()> {
        let text = envelope.to_json()?;
        let mut sessions = self.inner.write().await;
        let session = sessions
            .get(&client_id)
            .filter(|s| s.state.receives_traffic())
            .ok_or(AppError::ConnectionGone(client_id))?;
        if session.push(Message::Text(text.into())) {
            Ok(())
        } else {
            sessions.remove(&client_id);
            metrics::WS_CONNECTIONS.set(sessions.len() as i64);
            tracing::warn!(%client_id, "dropped dead connection on send");
            Err(AppError::ConnectionGone(client_id))
        }
    }

    /// Deliver to every open session subscribed to `channel`; returns the
    /// recipient count. A failed peer is pruned without interrupting the
    /// remaining deliveries.
    pub async fn broadcast(&self, channel: &str, envelope: &Envelope) -> usize {
        self.fan_out(Some(channel), envelope).await
    }

    /// Deliver to every open session regardless of subscriptions.
    pub async fn broadcast_all(&self, envelope: &Envelope) -> usize {
        self.fan_out(None, envelope).await
    }

    async fn fan_out(&self, channel: Option<&str>, envelope: &Envelope) -> usize {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, kind = %envelope.kind, "unserializable broadcast dropped");
                return 0;
            }
        };

        let mut sessions = self.inner.write().await;
        let mut delivered = 0usize;
        let mut dead: Vec<Uuid> = Vec::new();

        for (id, session) in sessions.iter() {
            if !session.state.receives_traffic() {
                continue;
            }
            if let Some(channel) = channel {
                if !session.channels.contains(channel) {
                    continue;
                }
            }
            if session.push(Message::Text(text.clone().into())) {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in &dead {
            sessions.remove(id);
            tracing::warn!(client_id = %id, "dropped dead connection during broadcast");
        }
        if !dead.is_empty() {
            metrics::WS_CONNECTIONS.set(sessions.len() as i64);
        }

        metrics::WS_BROADCASTS_TOTAL
            .with_label_values(&[metrics::channel_class(channel.unwrap_or("*"))])
            .inc();
        delivered
    }

    /// Record a heartbeat acknowledgment (`pong`, client `ping`, or a
    /// websocket pong frame).
    pub async fn mark_alive(&self, client_id: Uuid, now: DateTime<Utc>) {
        let mut sessions = self.inner.write().await;
        if let Some(session) = sessions.get_mut(&client_id) {
            if session.state == SessionState::PendingAck {
                session.state = SessionState::Open;
            }
            session.last_ack = now;
        }
    }

    /// One heartbeat pass: prune every session that never acknowledged the
    /// previous probe, then probe the survivors. Returns the pruned ids.
    ///
    /// `now` is injected so the sweep is deterministic under test.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut sessions = self.inner.write().await;
        let mut pruned: Vec<Uuid> = Vec::new();

        for (id, session) in sessions.iter_mut() {
            match session.state {
                SessionState::PendingAck => {
                    session.state = SessionState::Closed;
                    pruned.push(*id);
                }
                SessionState::Open | SessionState::Connecting => {
                    if session.push(Message::Ping(Bytes::new())) {
                        session.state = SessionState::PendingAck;
                    } else {
                        session.state = SessionState::Closed;
                        pruned.push(*id);
                    }
                }
                SessionState::Closed => pruned.push(*id),
            }
        }

        for id in &pruned {
            if let Some(session) = sessions.remove(id) {
                let silent_for = now.signed_duration_since(session.last_ack);
                tracing::info!(
                    client_id = %id,
                    silent_ms = silent_for.num_milliseconds(),
                    "pruned unresponsive connection"
                );
            }
        }
        if !pruned.is_empty() {
            metrics::WS_CONNECTIONS.set(sessions.len() as i64);
        }
        pruned
    }

    /// Spawn the fixed-interval heartbeat loop.
    pub fn start_heartbeat(&self, interval: Duration) -> TaskSupervisor {
        let registry = self.clone();
        TaskSupervisor::spawn("heartbeat-sweep", interval, move || {
            let registry = registry.clone();
            async move {
                let pruned = registry.sweep(Utc::now()).await;
                if !pruned.is_empty() {
                    tracing::debug!(count = pruned.len(), "heartbeat sweep pruned connections");
                }
            }
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|s| s.state.receives_traffic() && s.channels.contains(channel))
            .count()
    }

    /// Session state, if the session is still registered.
    pub async fn session_state(&self, client_id: Uuid) -> Option<SessionState> {
        self.inner.read().await.get(&client_id).map(|s| s.state)
    }

    pub async fn session_channels(&self, client_id: Uuid) -> Option<HashSet<String>> {
        self.inner
            .read()
            .await
            .get(&client_id)
            .map(|s| s.channels.clone())
    }

    /// External identity for a session, when one was presented on connect.
    pub async fn session_identity(&self, client_id: Uuid) -> Option<ClientIdentity> {
        self.inner.read().await.get(&client_id).map(|s| ClientIdentity {
            user_id: s.user_id.clone(),
            session_id: s.session_id.clone(),
        })
    }
}

fn push_envelope(session: &ClientSession, envelope: &Envelope) {
    match envelope.to_json() {
        Ok(text) => {
            if !session.push(Message::Text(text.into())) {
                tracing::debug!(kind = %envelope.kind, "ack not delivered, connection closing");
            }
        }
        Err(e) => tracing::error!(error = %e, kind = %envelope.kind, "unserializable ack dropped"),
    }
}
