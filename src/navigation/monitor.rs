//! Navigation Monitor
//!
//! Runs the tick driver: samples the avatar, steps the state machine and
//! turns its effects into publishes and chat sends. A failing or panicking
//! tick is reported as an `error` event; the loop keeps running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use auton8_shared::{now_ms, NavEffect, NavError, NavStateMachine, NavTuning, TickInput};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{lock_nav, AvatarProbe, ChatSender, CommandSource, NavHandle};
use crate::config::EndpointNames;
use crate::connection::TransportClient;
use crate::protocol::{self, event};
use crate::session::SessionManager;

/// Shortest tick period the driver accepts
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

pub struct NavigationMonitor {
    fsm: NavHandle,
    client: TransportClient,
    probe: Arc<dyn AvatarProbe>,
    chat: Arc<dyn ChatSender>,
    session: Option<Arc<SessionManager>>,
    events_endpoint: String,
    state_endpoint: String,
    tick_interval: Duration,
    running: AtomicBool,
}

impl NavigationMonitor {
    pub fn new(
        client: TransportClient,
        probe: Arc<dyn AvatarProbe>,
        chat: Arc<dyn ChatSender>,
        endpoints: &EndpointNames,
        tick_interval: Duration,
    ) -> Self {
        let tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        let tuning = NavTuning::for_tick_interval(tick_interval.as_millis() as u64);
        Self {
            fsm: Arc::new(Mutex::new(NavStateMachine::with_tuning(tuning, now_ms()))),
            client,
            probe,
            chat,
            session: None,
            events_endpoint: endpoints.events.clone(),
            state_endpoint: endpoints.baritone_state.clone(),
            tick_interval,
            running: AtomicBool::new(false),
        }
    }

    /// Drive the deferred `session_start` from this monitor's ticks
    pub fn with_session(mut self, session: Arc<SessionManager>) -> Self {
        self.session = Some(session);
        self
    }

    /// Handle to the state machine for command intake
    pub fn state_machine(&self) -> NavHandle {
        self.fsm.clone()
    }

    /// Run one tick at `now_ms`. Never panics, never fails.
    pub fn tick(&self, now_ms: u64) {
        match catch_unwind(AssertUnwindSafe(|| self.step(now_ms))) {
            Ok(Ok(())) => {
                let started = self.session.as_ref().is_some_and(|s| s.on_tick());
                if started {
                    self.publish_snapshot(now_ms);
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "navigation tick failed");
                self.publish_error(e.kind_name());
            }
            Err(_) => {
                error!("navigation tick panicked");
                self.publish_error("panic");
            }
        }
    }

    fn step(&self, now_ms: u64) -> Result<(), NavError> {
        let position = self.probe.position();
        let effects = lock_nav(&self.fsm).tick(TickInput { now_ms, position })?;
        for effect in effects {
            self.apply(effect);
        }
        Ok(())
    }

    fn apply(&self, effect: NavEffect) {
        match effect {
            NavEffect::Emit(ev) => {
                let detail = ev.detail();
                info!(event = ev.name(), %detail, "navigation event");
                self.client
                    .publish(&self.events_endpoint, protocol::event_payload(ev.name(), &detail));
            }
            NavEffect::Resend(text) => {
                info!(command = %text, "resending after stuck");
                self.chat.send(&text, CommandSource::Retry);
                self.client
                    .publish(&self.events_endpoint, protocol::event_payload(event::ACCEPTED, &text));
            }
            NavEffect::Snapshot(snapshot) => {
                self.client
                    .publish(&self.state_endpoint, protocol::snapshot_payload(&snapshot));
            }
        }
    }

    /// Publish a snapshot immediately, outside the periodic schedule
    pub fn publish_snapshot(&self, now_ms: u64) {
        let snapshot = lock_nav(&self.fsm).snapshot(now_ms);
        self.client
            .publish(&self.state_endpoint, protocol::snapshot_payload(&snapshot));
    }

    fn publish_error(&self, kind: &str) {
        self.client
            .publish(&self.events_endpoint, protocol::event_payload(event::ERROR, kind));
    }

    /// Start the tick driver
    pub fn start(self: &Arc<Self>) -> Result<MonitorHandle> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("navigation monitor already running");
        }

        let monitor = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(monitor.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => monitor.tick(now_ms()),
                }
            }

            monitor.running.store(false, Ordering::SeqCst);
            info!("navigation monitor stopped");
        });
        debug!(interval = ?self.tick_interval, "navigation monitor started");

        Ok(MonitorHandle { cancel, task })
    }
}

/// Handle to stop the tick driver
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the loop to exit
    pub async fn join(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
