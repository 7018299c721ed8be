//! Auton8 Shared Types
//!
//! This crate provides the wire envelope codec, the `#` command grammar and
//! the heuristic navigation state machine shared by the bridge binary and its
//! tests. Nothing in here performs I/O or depends on an async runtime.

pub mod codec;
pub mod command;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{enrich, CodecError, Envelope};
pub use command::{BlockPos, CommandError, CommandKind, NavCommand};
pub use state_machine::{
    CommandOutcome, NavEffect, NavError, NavEvent, NavSnapshot, NavState, NavStateMachine,
    NavTuning, OutcomeReason, RejectReason, TickInput, Vec3,
};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Well-known logical endpoints multiplexed over the transport
pub mod endpoints {
    /// Lifecycle, status and telemetry events
    pub const EVENTS: &str = "events";
    /// Inbound commands from the orchestrator
    pub const CMD: &str = "cmd";
    /// HUD snapshot JSON consumed by an external renderer
    pub const HUD: &str = "hud";
    /// Periodic navigation snapshot
    pub const NAV_STATE: &str = "baritone_state";
    /// Endpoint used when an inbound envelope carries none
    pub const DEFAULT: &str = "default";
}

/// Link parameters for the transport client
pub mod link {
    /// Fixed delay between reconnect attempts
    pub const RECONNECT_DELAY_MS: u64 = 5_000;

    /// Bound on authentication and stream establishment
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Bound on a single auth or publish request
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

    /// Bound on a confirmed publish during teardown
    pub const SESSION_END_TIMEOUT_MS: u64 = 2_000;
}

/// Tuning knobs for the navigation heuristics
///
/// All durations assume the nominal 20 Hz tick cadence.
pub mod nav {
    /// Nominal tick interval
    pub const TICK_INTERVAL_MS: u64 = 50;

    /// Minimum gap between two `baritone_state` snapshots
    pub const PUBLISH_INTERVAL_MS: u64 = 950;

    /// Time span of position samples kept for speed estimation
    pub const RING_WINDOW_MS: u64 = 1_000;

    /// Time during which automatic resends are suppressed
    pub const RESEND_COOLDOWN_MS: u64 = 8_000;

    /// Maximum automatic resends per armed command
    pub const MAX_RETRIES: u32 = 3;

    /// Horizontal distance at which the goal counts as reached
    pub const GOAL_EPSILON: f64 = 3.0;

    /// Continuous time within the goal epsilon before arrival is declared
    pub const GOAL_DWELL_MS: u64 = 1_200;

    /// Minimum gap between two `goal_reached` emissions
    pub const GOAL_REEMIT_COOLDOWN_MS: u64 = 10_000;

    /// Horizontal speed that counts as active pathing (m/s)
    pub const MOVING_SPEED: f64 = 0.4;

    /// Horizontal speed that counts as any movement at all (m/s)
    pub const MOVEMENT_EPSILON: f64 = 0.05;

    /// Time after issuance within which pathing must start
    pub const ACCEPT_WINDOW_MS: u64 = 15_000;

    /// Sustained movement required before a command counts as accepted
    pub const ACCEPT_SUSTAIN_MS: u64 = 1_500;

    /// Time without horizontal movement before the avatar counts as stuck
    pub const STUCK_IDLE_MS: u64 = 20_000;

    /// Longest accepted command string
    pub const MAX_COMMAND_LEN: usize = 120;
}
