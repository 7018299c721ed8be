//! Transport client with a supervised connect/reconnect loop

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use auton8_shared::{endpoints, link, Envelope};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::protocol::{self, event};
use crate::session::SessionSlot;
use crate::transport::{AuthToken, Credentials, InboundMessage, InboundStream, TransportBackend};

/// Connection state, owned by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Authenticating => write!(f, "AUTHENTICATING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

/// Detail values of `status` events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Reconnected,
    Disconnected,
    ConnectionLost,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Connected => "connected",
            LinkStatus::Reconnected => "reconnected",
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::ConnectionLost => "connection_lost",
        }
    }
}

/// Events observable by local subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A `status` event was written to the events endpoint
    Status(LinkStatus),
}

/// Handler invoked on the delivery task for every message on its endpoint
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Configuration for the transport client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub auth_key: String,
    pub events_endpoint: String,
    /// Reserved handler that also receives command-class messages
    pub cmd_endpoint: String,
    pub reconnect_delay: Duration,
    /// Bounds authentication plus stream establishment
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "auton8-bridge".into(),
            auth_key: String::new(),
            events_endpoint: endpoints::EVENTS.into(),
            cmd_endpoint: endpoints::CMD.into(),
            reconnect_delay: Duration::from_millis(link::RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_millis(link::CONNECT_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            auth_key: config.auth_key.clone(),
            events_endpoint: config.endpoints.events.clone(),
            cmd_endpoint: config.endpoints.cmd.clone(),
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

struct Outbound {
    envelope: Envelope,
    ack: Option<oneshot::Sender<Result<()>>>,
}

type TokenSlot = Arc<Mutex<Option<AuthToken>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    backend: Arc<dyn TransportBackend>,
    config: ClientConfig,
    session: SessionSlot,
    state: Mutex<ConnectionState>,
    /// Bumped by every connect/close; stale supervisors compare and bail out
    generation: AtomicU64,
    ever_connected: AtomicBool,
    handlers: Mutex<HashMap<String, MessageHandler>>,
    token: TokenSlot,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    cancel: Mutex<CancellationToken>,
}

/// Pub/sub client over a pluggable backend.
///
/// Cheap to clone; all clones share one connection. Must be created inside
/// a Tokio runtime.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

impl TransportClient {
    pub fn new(backend: Arc<dyn TransportBackend>, config: ClientConfig, session: SessionSlot) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        let token: TokenSlot = Arc::new(Mutex::new(None));

        // Single writer keeps publishes in submission order
        tokio::spawn(write_loop(backend.clone(), token.clone(), outbound_rx));

        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                session,
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                ever_connected: AtomicBool::new(false),
                handlers: Mutex::new(HashMap::new()),
                token,
                outbound_tx,
                events_tx,
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to local connection events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Register the handler for `endpoint`; the most recent registration wins
    pub fn on_message<F>(&self, endpoint: &str, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).insert(endpoint.to_string(), Arc::new(handler));
    }

    /// Start the supervisor. A no-op unless the client is DISCONNECTED.
    pub fn connect(&self) {
        let inner = &self.inner;
        let (generation, cancel) = {
            let mut state = lock(&inner.state);
            if *state != ConnectionState::Disconnected {
                debug!(state = %*state, "connect ignored");
                return;
            }
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let cancel = CancellationToken::new();
            *lock(&inner.cancel) = cancel.clone();
            *state = ConnectionState::Authenticating;
            (generation, cancel)
        };
        inner.notify(ConnectionState::Disconnected, ConnectionState::Authenticating);

        info!(backend = inner.backend.name(), "connecting");
        tokio::spawn(supervise(inner.clone(), generation, cancel));
    }

    /// Tear down the connection. Idempotent.
    pub fn close(&self) {
        let inner = &self.inner;
        let from = {
            let mut state = lock(&inner.state);
            inner.generation.fetch_add(1, Ordering::SeqCst);
            lock(&inner.cancel).cancel();
            *lock(&inner.token) = None;
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };

        if from != ConnectionState::Disconnected {
            info!("transport closed");
            inner.notify(from, ConnectionState::Disconnected);
        }
    }

    /// Fire-and-forget publish; dropped unless CONNECTED
    pub fn publish(&self, endpoint: &str, payload: Value) {
        if !self.is_connected() {
            trace!(endpoint, "not connected, dropping publish");
            return;
        }
        self.inner.enqueue(endpoint, payload, None);
    }

    /// Publish and wait for the write to complete, at most `wait`.
    ///
    /// Returns whether the write was confirmed. Failures are logged, never raised.
    pub async fn publish_sync(&self, endpoint: &str, payload: Value, wait: Duration) -> bool {
        if !self.is_connected() {
            trace!(endpoint, "not connected, dropping confirmed publish");
            return false;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner.enqueue(endpoint, payload, Some(ack_tx));

        match timeout(wait, ack_rx).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                debug!(endpoint, error = %e, "confirmed publish failed");
                false
            }
            Ok(Err(_)) => false,
            Err(_) => {
                debug!(endpoint, ?wait, "confirmed publish timed out");
                false
            }
        }
    }
}

impl Inner {
    fn enqueue(&self, endpoint: &str, payload: Value, ack: Option<oneshot::Sender<Result<()>>>) {
        let session_id = self.session.get();
        let envelope = Envelope::outbound(endpoint, payload, session_id.as_deref());
        if self.outbound_tx.send(Outbound { envelope, ack }).is_err() {
            warn!(endpoint, "outbound queue closed");
        }
    }

    /// Write a `status` event. Bypasses the CONNECTED check.
    fn emit_status(&self, status: LinkStatus) {
        debug!(status = status.as_str(), "link status");
        self.enqueue(
            &self.config.events_endpoint,
            protocol::event_payload(event::STATUS, status.as_str()),
            None,
        );
        let _ = self.events_tx.send(ConnectionEvent::Status(status));
    }

    fn notify(&self, from: ConnectionState, to: ConnectionState) {
        if from != to {
            let _ = self.events_tx.send(ConnectionEvent::StateChanged { from, to });
        }
    }

    /// Move to `to` if `generation` is still current
    fn transition(&self, generation: u64, to: ConnectionState) -> bool {
        let from = {
            let mut state = lock(&self.state);
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            std::mem::replace(&mut *state, to)
        };
        self.notify(from, to);
        true
    }

    /// Install `token` and go CONNECTED, only if `generation` is still current
    fn go_live(&self, generation: u64, token: AuthToken) -> bool {
        let from = {
            let mut state = lock(&self.state);
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *lock(&self.token) = Some(token);
            std::mem::replace(&mut *state, ConnectionState::Connected)
        };
        self.notify(from, ConnectionState::Connected);
        true
    }

    async fn establish(&self) -> Result<(AuthToken, InboundStream)> {
        let credentials = Credentials {
            client_id: self.config.client_id.clone(),
            auth_key: self.config.auth_key.clone(),
            session_id: self.session.get(),
        };
        let token = self.backend.authenticate(&credentials).await?;
        let stream = self.backend.open_stream(&token).await?;
        Ok((token, stream))
    }

    /// Deliver inbound messages until the stream fails; `None` when cancelled
    async fn pump(&self, mut stream: InboundStream, cancel: &CancellationToken) -> Option<String> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                item = stream.next() => match item {
                    Some(Ok(msg)) => self.dispatch(msg),
                    Some(Err(e)) => return Some(e.to_string()),
                    None => return Some("stream ended".into()),
                },
            }
        }
    }

    fn dispatch(&self, msg: InboundMessage) {
        let endpoint = msg.envelope.endpoint.as_str();
        let (primary, command) = {
            let handlers = lock(&self.handlers);
            let primary = handlers.get(endpoint).cloned();
            let command = if msg.is_command() && endpoint != self.config.cmd_endpoint {
                handlers.get(&self.config.cmd_endpoint).cloned()
            } else {
                None
            };
            (primary, command)
        };

        if primary.is_none() && command.is_none() {
            trace!(endpoint, "no handler, dropping message");
            return;
        }
        trace!(endpoint, command = command.is_some(), "dispatching message");
        if let Some(handler) = primary {
            handler(&msg.envelope);
        }
        if let Some(handler) = command {
            handler(&msg.envelope);
        }
    }
}

/// Connect, pump, and reconnect with a fixed delay until cancelled
async fn supervise(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            result = timeout(inner.config.connect_timeout, inner.establish()) => result,
        };

        match attempt {
            Ok(Ok((token, stream))) => {
                if !inner.go_live(generation, token) {
                    return;
                }
                let first = !inner.ever_connected.swap(true, Ordering::SeqCst);
                info!(backend = inner.backend.name(), first, "connected");
                inner.emit_status(if first {
                    LinkStatus::Connected
                } else {
                    LinkStatus::Reconnected
                });

                let Some(reason) = inner.pump(stream, &cancel).await else {
                    return;
                };
                warn!(%reason, "connection lost");
                if !inner.transition(generation, ConnectionState::Reconnecting) {
                    return;
                }
                inner.emit_status(LinkStatus::Disconnected);
                inner.emit_status(LinkStatus::ConnectionLost);
            }
            failed => {
                let reason = match failed {
                    Ok(Err(e)) => e.to_string(),
                    _ => "connect timed out".to_string(),
                };
                warn!(%reason, "connection attempt failed");
                if !inner.transition(generation, ConnectionState::Reconnecting) {
                    return;
                }
                if inner.ever_connected.load(Ordering::SeqCst) {
                    inner.emit_status(LinkStatus::ConnectionLost);
                }
            }
        }

        debug!(delay = ?inner.config.reconnect_delay, "reconnecting after delay");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(inner.config.reconnect_delay) => {}
        }
        if !inner.transition(generation, ConnectionState::Authenticating) {
            return;
        }
    }
}

/// Drain the outbound queue through the backend, one envelope at a time
async fn write_loop(
    backend: Arc<dyn TransportBackend>,
    token: TokenSlot,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(Outbound { envelope, ack }) = outbound_rx.recv().await {
        let current = lock(&token).clone();
        let result = match current {
            Some(token) => backend.send(&token, &envelope).await,
            None => Err(anyhow!("no auth token")),
        };
        if let Err(e) = &result {
            debug!(endpoint = %envelope.endpoint, error = %e, "outbound send failed");
        }
        if let Some(ack) = ack {
            let _ = ack.send(result);
        }
    }
    trace!("outbound queue drained");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// In-memory backend that records sends and lets tests drive the stream
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub sent: Mutex<Vec<Envelope>>,
        pub auth_calls: AtomicUsize,
        pub fail_auth: AtomicBool,
        inbound: Mutex<Option<fmpsc::UnboundedSender<Result<InboundMessage>>>>,
    }

    impl FakeBackend {
        pub fn push(&self, msg: InboundMessage) {
            if let Some(tx) = lock(&self.inbound).as_ref() {
                tx.unbounded_send(Ok(msg)).unwrap();
            }
        }

        /// End the current inbound stream
        pub fn drop_stream(&self) {
            lock(&self.inbound).take();
        }

        pub fn sent(&self) -> Vec<Envelope> {
            lock(&self.sent).clone()
        }

        /// `(event, detail)` of every event payload sent so far
        pub fn sent_events(&self) -> Vec<(String, String)> {
            self.sent()
                .iter()
                .filter(|e| e.data["type"] == "event")
                .map(|e| {
                    (
                        e.data["event"].as_str().unwrap_or_default().to_string(),
                        e.data["detail"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        }
    }

    #[async_trait]
    impl TransportBackend for FakeBackend {
        async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth.load(Ordering::SeqCst) {
                return Err(anyhow!("auth refused"));
            }
            Ok(AuthToken {
                token: "tok".into(),
                session_id: credentials.session_id.clone(),
            })
        }

        async fn open_stream(&self, _token: &AuthToken) -> Result<InboundStream> {
            let (tx, rx) = fmpsc::unbounded();
            *lock(&self.inbound) = Some(tx);
            Ok(Box::pin(rx))
        }

        async fn send(&self, _token: &AuthToken, envelope: &Envelope) -> Result<()> {
            lock(&self.sent).push(envelope.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    pub(crate) fn client_with(backend: Arc<FakeBackend>, session: SessionSlot) -> TransportClient {
        TransportClient::new(backend, ClientConfig::default(), session)
    }

    pub(crate) async fn wait_for_state(client: &TransportClient, want: ConnectionState) {
        for _ in 0..1_000 {
            if client.state() == want {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("state never became {want}, stuck at {}", client.state());
    }

    /// Let the writer task drain
    pub(crate) async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    fn message(endpoint: &str, data: Value) -> InboundMessage {
        InboundMessage::new(Envelope::outbound(endpoint, data, None))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_while_disconnected_never_reaches_transport() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        client.publish("events", json!({"a": 1}));
        assert!(!client.publish_sync("events", json!({"a": 2}), Duration::from_secs(1)).await);
        settle().await;

        assert!(backend.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_emits_connected_and_routes_messages() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        client.on_message("hud", move |env| {
            assert_eq!(env.data["status"], "active");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        backend.push(message("hud", json!({"status": "active"})));
        backend.push(message("unknown", json!({})));
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            backend.sent_events(),
            vec![("status".to_string(), "connected".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_class_also_reaches_cmd_handler() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        let events = Arc::new(AtomicUsize::new(0));
        let cmds = Arc::new(AtomicUsize::new(0));
        let (e, c) = (events.clone(), cmds.clone());
        client.on_message("events", move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });
        client.on_message("cmd", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        backend.push(message("events", json!({})).with_class("command"));
        backend.push(message("events", json!({})));
        backend.push(message("cmd", json!({})).with_class("command"));
        settle().await;

        assert_eq!(events.load(Ordering::SeqCst), 2);
        // Once forwarded, once direct; the direct one is not delivered twice
        assert_eq!(cmds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_handler_registration_wins() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (f, s) = (first.clone(), second.clone());
        client.on_message("hud", move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        client.on_message("hud", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        backend.push(message("hud", json!({})));
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_loss_reconnects_after_fixed_delay() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());
        let mut events = client.subscribe();

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;

        let dropped_at = tokio::time::Instant::now();
        backend.drop_stream();

        let mut statuses = Vec::new();
        while statuses.len() < 4 {
            let event = timeout(Duration::from_secs(30), events.recv())
                .await
                .expect("status event")
                .expect("channel open");
            if let ConnectionEvent::Status(status) = event {
                statuses.push(status);
            }
        }

        assert_eq!(
            statuses,
            vec![
                LinkStatus::Connected,
                LinkStatus::Disconnected,
                LinkStatus::ConnectionLost,
                LinkStatus::Reconnected,
            ]
        );
        assert!(dropped_at.elapsed() >= Duration::from_secs(5));
        assert_eq!(backend.auth_calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.state(), ConnectionState::Connected);

        settle().await;
        let details: Vec<_> = backend.sent_events().into_iter().map(|(_, d)| d).collect();
        assert_eq!(
            details,
            vec!["connected", "disconnected", "connection_lost", "reconnected"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_failure_is_silent() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_auth.store(true, Ordering::SeqCst);
        let client = client_with(backend.clone(), SessionSlot::default());
        let mut events = client.subscribe();

        client.connect();
        wait_for_state(&client, ConnectionState::Reconnecting).await;
        sleep(Duration::from_secs(12)).await;
        assert!(backend.auth_calls.load(Ordering::SeqCst) >= 3);

        backend.fail_auth.store(false, Ordering::SeqCst);
        wait_for_state(&client, ConnectionState::Connected).await;

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::Status(status) = event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![LinkStatus::Connected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_stops_reconnects() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        client.close();
        client.close();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        backend.drop_stream();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.auth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // A fresh connect after close works
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        assert_eq!(backend.auth_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_supervisor_cannot_install_token() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        let stale = client.inner.generation.load(Ordering::SeqCst);
        client.close();
        assert!(lock(&client.inner.token).is_none());

        // An auth that finishes after close must not revive the link
        let late = AuthToken {
            token: "late".into(),
            session_id: None,
        };
        assert!(!client.inner.go_live(stale, late));
        assert!(lock(&client.inner.token).is_none());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.publish("events", json!({"a": 1}));
        settle().await;
        assert!(backend.sent().iter().all(|e| e.data.get("a").is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_starts_one_supervisor() {
        let backend = Arc::new(FakeBackend::default());
        let client = client_with(backend.clone(), SessionSlot::default());

        client.connect();
        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        settle().await;
        assert_eq!(backend.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_payloads_carry_session_id() {
        let backend = Arc::new(FakeBackend::default());
        let session = SessionSlot::default();
        session.set("sid-9");
        let client = client_with(backend.clone(), session);

        client.connect();
        wait_for_state(&client, ConnectionState::Connected).await;
        client.publish("events", json!({"a": 1}));
        client.publish("events", json!({"session_id": "mine"}));
        assert!(client.publish_sync("hud", json!([1]), Duration::from_secs(2)).await);
        settle().await;

        let sent = backend.sent();
        let published: Vec<_> = sent.iter().filter(|e| e.data["type"] != "event").collect();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].data["session_id"], "sid-9");
        assert_eq!(published[1].data["session_id"], "mine");
        assert_eq!(published[2].data, json!([1]));
        assert!(published.iter().all(|e| e.session_id.as_deref() == Some("sid-9")));
    }
}
