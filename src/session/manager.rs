use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use auton8_shared::{link, now_ms};
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::SessionSlot;
use crate::connection::TransportClient;
use crate::protocol::{self, event};

/// Issues a session id per activation and emits the lifecycle events
pub struct SessionManager {
    slot: SessionSlot,
    client: TransportClient,
    events_endpoint: String,
    started_at: Mutex<Option<u64>>,
    start_pending: AtomicBool,
}

impl SessionManager {
    pub fn new(slot: SessionSlot, client: TransportClient, events_endpoint: impl Into<String>) -> Self {
        Self {
            slot,
            client,
            events_endpoint: events_endpoint.into(),
            started_at: Mutex::new(None),
            start_pending: AtomicBool::new(false),
        }
    }

    /// Generate a fresh session id and queue `session_start`
    pub fn activate(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.slot.set(id.clone());
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(now_ms());
        self.start_pending.store(true, Ordering::SeqCst);
        info!(session_id = %id, "session activated");
        id
    }

    pub fn session_id(&self) -> Option<String> {
        self.slot.get()
    }

    pub fn start_pending(&self) -> bool {
        self.start_pending.load(Ordering::SeqCst)
    }

    /// Drive the deferred `session_start`.
    ///
    /// Returns true only on the call that emitted it. While the transport is
    /// not connected the start stays pending for the next tick.
    pub fn on_tick(&self) -> bool {
        if !self.start_pending() {
            return false;
        }
        if !self.client.is_connected() {
            trace!("session_start deferred, transport not connected");
            return false;
        }
        let Some(id) = self.slot.get() else {
            self.start_pending.store(false, Ordering::SeqCst);
            return false;
        };

        let started_at = *self.started_at.lock().unwrap_or_else(PoisonError::into_inner);
        let started_at = started_at.unwrap_or_else(now_ms);
        self.client.publish(
            &self.events_endpoint,
            protocol::session_payload(event::SESSION_START, &id, "started_at", started_at),
        );
        self.start_pending.store(false, Ordering::SeqCst);
        info!(session_id = %id, "session_start emitted");
        true
    }

    /// Emit `session_end` best-effort and forget the id. Never fails.
    pub async fn deactivate(&self) {
        self.start_pending.store(false, Ordering::SeqCst);
        let Some(id) = self.slot.get() else {
            return;
        };

        let confirmed = self
            .client
            .publish_sync(
                &self.events_endpoint,
                protocol::session_payload(event::SESSION_END, &id, "ended_at", now_ms()),
                Duration::from_millis(link::SESSION_END_TIMEOUT_MS),
            )
            .await;
        if !confirmed {
            debug!(session_id = %id, "session_end not confirmed");
        }

        self.slot.clear();
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!(session_id = %id, "session deactivated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{client_with, settle, wait_for_state, FakeBackend};
    use crate::connection::ConnectionState;
    use std::sync::Arc;

    fn manager(backend: Arc<FakeBackend>) -> (SessionManager, TransportClient) {
        let slot = SessionSlot::default();
        let client = client_with(backend, slot.clone());
        (SessionManager::new(slot, client.clone(), "events"), client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_activation_gets_a_fresh_uuid() {
        let (sessions, _client) = manager(Arc::new(FakeBackend::default()));
        let first = sessions.activate();
        let second = sessions.activate();

        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
        assert_eq!(sessions.session_id(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_start_waits_for_connection() {
        let backend = Arc::new(FakeBackend::default());
        let (sessions, client) = manager(backend.clone());
        let id = sessions.activate();

        assert!(!sessions.on_tick());
        assert!(sessions.start_pending());

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        assert!(sessions.on_tick());
        assert!(!sessions.on_tick());
        settle().await;

        let starts: Vec<_> = backend
            .sent()
            .into_iter()
            .filter(|e| e.data["event"] == "session_start")
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].data["detail"], id.as_str());
        assert_eq!(starts[0].data["session_id"], id.as_str());
        assert!(starts[0].data["started_at"].as_u64().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_emits_session_end_and_clears() {
        let backend = Arc::new(FakeBackend::default());
        let (sessions, client) = manager(backend.clone());
        let id = sessions.activate();
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        sessions.deactivate().await;

        assert!(sessions.session_id().is_none());
        let ends: Vec<_> = backend
            .sent()
            .into_iter()
            .filter(|e| e.data["event"] == "session_end")
            .collect();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].data["detail"], id.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_while_disconnected_still_completes() {
        let backend = Arc::new(FakeBackend::default());
        let (sessions, _client) = manager(backend.clone());
        sessions.activate();

        sessions.deactivate().await;
        assert!(sessions.session_id().is_none());
        assert!(!sessions.start_pending());
        assert!(backend.sent().is_empty());
    }
}
