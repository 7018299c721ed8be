//! Navigation State Machine
//!
//! Infers the progress of an opaque pathfinding engine purely from observed
//! avatar positions and elapsed time. The machine never sleeps or performs
//! I/O: the caller injects the clock through [`TickInput`] and turns the
//! returned [`NavEffect`]s into publishes and chat sends.
//!
//! Only horizontal (X/Z) motion counts. Elevation changes while pathing are
//! not a reliable progress signal.

use std::collections::VecDeque;

use serde::Serialize;
use thiserror::Error;

use crate::command::{BlockPos, CommandKind, NavCommand, RESUME_COMMAND};
use crate::nav;

/// A 3-D avatar position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance in the X/Z plane
    pub fn horizontal_distance(&self, other: &Vec3) -> f64 {
        (other.x - self.x).hypot(other.z - self.z)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Heuristic navigation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavState {
    Idle,
    Pathing,
    /// Sticky: only goal reached, cancel or a fresh command clear it
    Stuck,
}

/// Outcome of the most recent command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutcome {
    Pending,
    Success,
    Fail,
}

/// Why the most recent command ended up where it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    None,
    Stuck,
    GoalReached,
    Cancelled,
    Timeout,
}

/// Detail carried by a `cmd_reject` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    BadCmd,
    NoPlayer,
    TimeoutNoPathing,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::BadCmd => "bad_cmd",
            RejectReason::NoPlayer => "no_player",
            RejectReason::TimeoutNoPathing => "timeout_no_pathing",
        }
    }
}

/// Discrete lifecycle events raised by the heuristics
#[derive(Debug, Clone, PartialEq)]
pub enum NavEvent {
    /// Sustained movement observed after a command was armed
    CmdAccepted { command: String },
    /// Command refused or never started pathing
    CmdReject { reason: RejectReason },
    /// Avatar dwelled within the goal epsilon
    GoalReached { target: BlockPos },
    /// No horizontal movement for the idle duration; `distance` is -1 without a target
    StuckDetected { distance: i64 },
}

impl NavEvent {
    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            NavEvent::CmdAccepted { .. } => "cmd_accepted",
            NavEvent::CmdReject { .. } => "cmd_reject",
            NavEvent::GoalReached { .. } => "goal_reached",
            NavEvent::StuckDetected { .. } => "stuck_detected",
        }
    }

    /// Event detail on the wire
    pub fn detail(&self) -> String {
        match self {
            NavEvent::CmdAccepted { command } => command.clone(),
            NavEvent::CmdReject { reason } => reason.as_str().to_string(),
            NavEvent::GoalReached { target } => target.to_string(),
            NavEvent::StuckDetected { distance } => distance.to_string(),
        }
    }
}

/// Side effects requested by a tick
#[derive(Debug, Clone, PartialEq)]
pub enum NavEffect {
    /// Publish a lifecycle event
    Emit(NavEvent),
    /// Re-issue a command through the game chat
    Resend(String),
    /// Publish a periodic snapshot
    Snapshot(NavSnapshot),
}

/// One step of input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub now_ms: u64,
    /// `None` when there is no player/avatar
    pub position: Option<Vec3>,
}

/// Errors raised by a tick
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("non-finite avatar position: {0:?}")]
    InvalidPosition(Vec3),
}

impl NavError {
    /// Short kind name reported in `error` events
    pub fn kind_name(&self) -> &'static str {
        match self {
            NavError::InvalidPosition(_) => "InvalidPosition",
        }
    }
}

/// Tuning knobs, defaulting to [`crate::nav`]
#[derive(Debug, Clone)]
pub struct NavTuning {
    pub tick_interval_ms: u64,
    pub publish_interval_ms: u64,
    pub ring_capacity: usize,
    pub cooldown_ticks: u32,
    pub max_retries: u32,
    pub goal_epsilon: f64,
    pub goal_dwell_ms: u64,
    pub goal_reemit_cooldown_ms: u64,
    pub moving_speed: f64,
    pub movement_epsilon: f64,
    pub accept_window_ms: u64,
    pub accept_sustain_ms: u64,
    pub stuck_idle_ms: u64,
}

impl Default for NavTuning {
    fn default() -> Self {
        Self::for_tick_interval(nav::TICK_INTERVAL_MS)
    }
}

impl NavTuning {
    /// Default tuning with tick-counted knobs derived from `tick_interval_ms`
    pub fn for_tick_interval(tick_interval_ms: u64) -> Self {
        let tick = tick_interval_ms.max(1);
        Self {
            tick_interval_ms: tick,
            publish_interval_ms: nav::PUBLISH_INTERVAL_MS,
            ring_capacity: nav::RING_WINDOW_MS.div_ceil(tick).max(2) as usize,
            cooldown_ticks: nav::RESEND_COOLDOWN_MS.div_ceil(tick) as u32,
            max_retries: nav::MAX_RETRIES,
            goal_epsilon: nav::GOAL_EPSILON,
            goal_dwell_ms: nav::GOAL_DWELL_MS,
            goal_reemit_cooldown_ms: nav::GOAL_REEMIT_COOLDOWN_MS,
            moving_speed: nav::MOVING_SPEED,
            movement_epsilon: nav::MOVEMENT_EPSILON,
            accept_window_ms: nav::ACCEPT_WINDOW_MS,
            accept_sustain_ms: nav::ACCEPT_SUSTAIN_MS,
            stuck_idle_ms: nav::STUCK_IDLE_MS,
        }
    }
}

/// The armed command
#[derive(Debug, Clone, PartialEq)]
struct CommandContext {
    text: String,
    started_at: u64,
    target: Option<BlockPos>,
    travel: bool,
}

#[derive(Debug, Clone, Default)]
struct AcceptanceWindow {
    awaiting: bool,
    deadline: u64,
    emitted: bool,
    moving_since: Option<u64>,
}

impl AcceptanceWindow {
    fn arm(&mut self, now_ms: u64, window_ms: u64) {
        *self = Self {
            awaiting: true,
            deadline: now_ms + window_ms,
            emitted: false,
            moving_since: None,
        };
    }
}

#[derive(Debug, Clone, Default)]
struct GoalProgress {
    within_since: Option<u64>,
    emitted_for_target: bool,
    /// Survives target changes so the re-emit cooldown spans targets
    last_emitted_at: Option<u64>,
}

impl GoalProgress {
    fn reset_target(&mut self) {
        self.within_since = None;
        self.emitted_for_target = false;
    }
}

/// Fixed-capacity buffer of timestamped positions
#[derive(Debug, Clone)]
struct PositionRing {
    samples: VecDeque<(u64, Vec3)>,
    capacity: usize,
}

impl PositionRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(2),
        }
    }

    fn push(&mut self, now_ms: u64, pos: Vec3) {
        self.samples.push_back((now_ms, pos));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Average X/Z speed over the window in m/s
    fn horizontal_speed(&self, min_dt_ms: u64) -> f64 {
        let (Some((t0, first)), Some((t1, last))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let dt_ms = t1.saturating_sub(*t0).max(min_dt_ms.max(1));
        first.horizontal_distance(last) / (dt_ms as f64 / 1000.0)
    }
}

/// Point-in-time view published on the `baritone_state` endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavSnapshot {
    pub ts: u64,
    pub state: NavState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cmd: Option<String>,
    pub last_cmd_outcome: CommandOutcome,
    pub reason: OutcomeReason,
    pub elapsed_sec: u64,
    pub retries: u32,
    pub cooldown_sec: u32,
    pub speed_avg: f64,
    pub distance_remaining: f64,
    pub awaiting_accept: bool,
    pub accepted_emitted: bool,
    pub moving_since_ms: u64,
    pub within_goal_now: bool,
    pub within_goal_for_ms: u64,
    pub last_goal_emit_ms_ago: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<SnapshotTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotTarget {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub key: String,
}

/// The heuristic pathfinding observer
#[derive(Debug, Clone)]
pub struct NavStateMachine {
    tuning: NavTuning,
    state: NavState,
    command: Option<CommandContext>,
    outcome: CommandOutcome,
    reason: OutcomeReason,
    acceptance: AcceptanceWindow,
    goal: GoalProgress,
    ring: PositionRing,
    last_horizontal_move_at: u64,
    retries: u32,
    cooldown_ticks: u32,
    speed: f64,
    distance_remaining: Option<f64>,
    last_snapshot_at: Option<u64>,
}

impl NavStateMachine {
    /// Create a machine in `Idle`; the stuck timer starts at `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self::with_tuning(NavTuning::default(), now_ms)
    }

    pub fn with_tuning(tuning: NavTuning, now_ms: u64) -> Self {
        Self {
            ring: PositionRing::new(tuning.ring_capacity),
            tuning,
            state: NavState::Idle,
            command: None,
            outcome: CommandOutcome::Pending,
            reason: OutcomeReason::None,
            acceptance: AcceptanceWindow::default(),
            goal: GoalProgress::default(),
            last_horizontal_move_at: now_ms,
            retries: 0,
            cooldown_ticks: 0,
            speed: 0.0,
            distance_remaining: None,
            last_snapshot_at: None,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn outcome(&self) -> CommandOutcome {
        self.outcome
    }

    pub fn reason(&self) -> OutcomeReason {
        self.reason
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn tuning(&self) -> &NavTuning {
        &self.tuning
    }

    pub fn cooldown_ticks(&self) -> u32 {
        self.cooldown_ticks
    }

    /// Text of the armed command, if any
    pub fn armed_command(&self) -> Option<&str> {
        self.command.as_ref().map(|c| c.text.as_str())
    }

    pub fn target(&self) -> Option<BlockPos> {
        self.command.as_ref().and_then(|c| c.target)
    }

    pub fn awaiting_acceptance(&self) -> bool {
        self.acceptance.awaiting
    }

    /// Average horizontal speed measured on the last tick
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Arm a command, replacing whatever was armed before.
    ///
    /// `#cancel`/`#stop` clear the context immediately; `#path` re-arms the
    /// acceptance window on the current command and counts as a retry.
    pub fn arm(&mut self, command: &NavCommand, now_ms: u64) {
        match command.kind {
            CommandKind::Cancel => self.cancel(),
            CommandKind::Resume if self.command.is_some() => {
                self.retries = (self.retries + 1).min(self.tuning.max_retries);
                self.acceptance.arm(now_ms, self.tuning.accept_window_ms);
            }
            _ => {
                self.command = Some(CommandContext {
                    text: command.text.clone(),
                    started_at: now_ms,
                    target: command.target(),
                    travel: command.is_travel(),
                });
                self.outcome = CommandOutcome::Pending;
                self.reason = OutcomeReason::None;
                self.retries = 0;
                self.distance_remaining = None;
                self.acceptance.arm(now_ms, self.tuning.accept_window_ms);
                self.goal.reset_target();
            }
        }
    }

    /// Drop the armed command without waiting for any confirmation
    pub fn cancel(&mut self) {
        self.clear_context();
        self.reason = OutcomeReason::Cancelled;
        self.state = NavState::Idle;
    }

    /// Advance one tick.
    ///
    /// Returns the effects the caller must carry out, in order.
    pub fn tick(&mut self, input: TickInput) -> Result<Vec<NavEffect>, NavError> {
        if let Some(pos) = input.position {
            if !pos.is_finite() {
                return Err(NavError::InvalidPosition(pos));
            }
        }

        let now = input.now_ms;
        let mut effects = Vec::new();

        self.cooldown_ticks = self.cooldown_ticks.saturating_sub(1);

        if let Some(pos) = input.position {
            self.ring.push(now, pos);
        }
        self.speed = self.ring.horizontal_speed(self.tuning.tick_interval_ms);
        self.distance_remaining = match (self.target(), input.position) {
            (Some(target), Some(pos)) => Some(pos.horizontal_distance(&target_center(target))),
            _ => None,
        };

        if self.speed >= self.tuning.movement_epsilon {
            self.last_horizontal_move_at = now;
        }

        let moving = self.speed >= self.tuning.moving_speed;
        self.update_acceptance(now, moving, &mut effects);

        // Sticky state: STUCK survives until explicitly cleared
        if moving {
            self.state = NavState::Pathing;
        } else if self.state != NavState::Stuck {
            self.state = NavState::Idle;
        }

        if !self.detect_goal(now, &mut effects) {
            self.detect_stuck(now, &mut effects);
        }

        if self.snapshot_due(now) {
            self.last_snapshot_at = Some(now);
            effects.push(NavEffect::Snapshot(self.snapshot(now)));
        }

        Ok(effects)
    }

    fn update_acceptance(&mut self, now: u64, moving: bool, effects: &mut Vec<NavEffect>) {
        if self.acceptance.awaiting && moving {
            let since = *self.acceptance.moving_since.get_or_insert(now);
            if !self.acceptance.emitted && now.saturating_sub(since) >= self.tuning.accept_sustain_ms {
                let command = self.armed_command().unwrap_or_default().to_string();
                effects.push(NavEffect::Emit(NavEvent::CmdAccepted { command }));
                self.acceptance.awaiting = false;
                self.acceptance.emitted = true;
                self.state = NavState::Pathing;
            }
        } else {
            // Lost movement resets the sustain timer, never the emitted latch
            self.acceptance.moving_since = None;
        }

        // The command stays armed: a late start can still reach the goal
        if self.acceptance.awaiting && !self.acceptance.emitted && now > self.acceptance.deadline {
            effects.push(NavEffect::Emit(NavEvent::CmdReject {
                reason: RejectReason::TimeoutNoPathing,
            }));
            self.acceptance.awaiting = false;
            self.reason = OutcomeReason::Timeout;
        }
    }

    /// Returns true when `goal_reached` fired on this tick
    fn detect_goal(&mut self, now: u64, effects: &mut Vec<NavEffect>) -> bool {
        let (Some(target), Some(distance)) = (self.target(), self.distance_remaining) else {
            return false;
        };

        if distance > self.tuning.goal_epsilon {
            self.goal.within_since = None;
            return false;
        }

        let since = *self.goal.within_since.get_or_insert(now);
        let cooled_down = self
            .goal
            .last_emitted_at
            .map_or(true, |at| now.saturating_sub(at) >= self.tuning.goal_reemit_cooldown_ms);

        if self.goal.emitted_for_target || now.saturating_sub(since) < self.tuning.goal_dwell_ms || !cooled_down {
            return false;
        }

        effects.push(NavEffect::Emit(NavEvent::GoalReached { target }));
        self.outcome = CommandOutcome::Success;
        self.reason = OutcomeReason::GoalReached;
        self.goal.emitted_for_target = true;
        self.goal.last_emitted_at = Some(now);

        // Later movement must never be attributed to this command
        self.clear_context();
        self.retries = 0;
        self.state = NavState::Idle;
        true
    }

    fn detect_stuck(&mut self, now: u64, effects: &mut Vec<NavEffect>) {
        if now.saturating_sub(self.last_horizontal_move_at) < self.tuning.stuck_idle_ms {
            return;
        }

        self.state = NavState::Stuck;
        self.reason = OutcomeReason::Stuck;
        let distance = self.distance_remaining.map_or(-1, |d| d.round() as i64);
        effects.push(NavEffect::Emit(NavEvent::StuckDetected { distance }));

        let travel = self.command.as_ref().is_some_and(|c| c.travel);
        if self.retries >= self.tuning.max_retries {
            self.outcome = CommandOutcome::Fail;
        } else if travel && self.cooldown_ticks == 0 {
            effects.push(NavEffect::Resend(RESUME_COMMAND.to_string()));
            self.retries += 1;
            self.cooldown_ticks = self.tuning.cooldown_ticks;
            self.acceptance.arm(now, self.tuning.accept_window_ms);
        }

        // Re-arm the idle timer so the trigger does not fire every tick
        self.last_horizontal_move_at = now;
    }

    fn snapshot_due(&self, now: u64) -> bool {
        self.last_snapshot_at
            .map_or(true, |at| now.saturating_sub(at) >= self.tuning.publish_interval_ms)
    }

    /// Build a full snapshot of the heuristic state
    pub fn snapshot(&self, now_ms: u64) -> NavSnapshot {
        let started_at = self.command.as_ref().map(|c| c.started_at);
        let within_goal_now = self.goal.within_since.is_some();

        NavSnapshot {
            ts: now_ms / 1000,
            state: self.state,
            last_cmd: self.armed_command().map(str::to_string),
            last_cmd_outcome: self.outcome,
            reason: self.reason,
            elapsed_sec: started_at.map_or(0, |at| now_ms.saturating_sub(at) / 1000),
            retries: self.retries,
            cooldown_sec: (u64::from(self.cooldown_ticks) * self.tuning.tick_interval_ms / 1000) as u32,
            speed_avg: (self.speed * 100.0).round() / 100.0,
            distance_remaining: self.distance_remaining.unwrap_or(-1.0),
            awaiting_accept: self.acceptance.awaiting,
            accepted_emitted: self.acceptance.emitted,
            moving_since_ms: self.acceptance.moving_since.unwrap_or(0),
            within_goal_now,
            within_goal_for_ms: self
                .goal
                .within_since
                .map_or(0, |at| now_ms.saturating_sub(at)),
            last_goal_emit_ms_ago: self
                .goal
                .last_emitted_at
                .map_or(-1, |at| now_ms.saturating_sub(at) as i64),
            target: self.target().map(|t| SnapshotTarget {
                x: t.x,
                y: t.y,
                z: t.z,
                key: t.key(),
            }),
        }
    }

    fn clear_context(&mut self) {
        self.command = None;
        self.distance_remaining = None;
        self.acceptance = AcceptanceWindow::default();
        self.goal.reset_target();
    }
}

/// Center of the target block in the X/Z plane
fn target_center(target: BlockPos) -> Vec3 {
    Vec3::new(
        target.x as f64 + 0.5,
        target.y as f64,
        target.z as f64 + 0.5,
    )
}
