//! Latest HUD status received on the `hud` endpoint
//!
//! The renderer itself is an external consumer; this store only keeps the
//! most recent well-formed payload with its receive time.

use std::sync::{Arc, PoisonError, RwLock};

use auton8_shared::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HudTarget {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HudGoal {
    pub desc: Option<String>,
    pub dimension: Option<String>,
    pub target: Option<HudTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HudPlayer {
    pub name: Option<String>,
    pub dist: Option<f64>,
}

/// HUD payload as published by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HudStatus {
    pub title: String,
    /// Alias some producers send instead of `status`
    pub agent_status: Option<String>,
    pub status: Option<String>,
    pub world: String,
    pub dimension: Option<String>,
    pub distance_from_spawn: Option<i64>,
    pub speed_bps: Option<f64>,
    pub goal: Option<HudGoal>,
    /// Flat target, still accepted next to `goal.target`
    pub target: Option<HudTarget>,
    pub step_remaining: Option<i64>,
    pub cooldown_sec: Option<i64>,
    pub danger: Option<bool>,
    pub last_player: Option<HudPlayer>,
    pub message: String,
    pub planner_reason: Option<String>,
    pub goal_expl: Option<String>,
    #[serde(skip)]
    pub last_update_ms: u64,
}

impl Default for HudStatus {
    fn default() -> Self {
        Self {
            title: "Auton8".into(),
            agent_status: None,
            status: None,
            world: String::new(),
            dimension: None,
            distance_from_spawn: None,
            speed_bps: None,
            goal: None,
            target: None,
            step_remaining: None,
            cooldown_sec: None,
            danger: None,
            last_player: None,
            message: String::new(),
            planner_reason: None,
            goal_expl: None,
            last_update_ms: 0,
        }
    }
}

impl HudStatus {
    /// Effective status, `idle` when none was given
    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("idle")
    }

    /// Target from `goal.target`, falling back to the flat `target`
    pub fn effective_target(&self) -> Option<&HudTarget> {
        self.goal
            .as_ref()
            .and_then(|g| g.target.as_ref())
            .or(self.target.as_ref())
    }

    fn apply_status_alias(&mut self) {
        let blank = self.status.as_deref().map_or(true, |s| s.trim().is_empty());
        if blank && self.agent_status.is_some() {
            self.status = self.agent_status.clone();
        }
    }
}

/// Thread-safe holder of the latest HUD status
#[derive(Debug, Clone, Default)]
pub struct HudStatusStore {
    latest: Arc<RwLock<HudStatus>>,
}

impl HudStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from an envelope payload. A JSON string payload is parsed as
    /// JSON first. Returns false, keeping the previous status, for bad payloads.
    pub fn update_from_value(&self, data: &Value) -> bool {
        let parsed = match data {
            Value::String(text) => serde_json::from_str::<HudStatus>(text),
            other => HudStatus::deserialize(other),
        };
        match parsed {
            Ok(status) => {
                self.store(status);
                true
            }
            Err(e) => {
                trace!(error = %e, "ignoring bad HUD payload");
                false
            }
        }
    }

    fn store(&self, mut status: HudStatus) {
        status.apply_status_alias();
        status.last_update_ms = now_ms();
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn snapshot(&self) -> HudStatus {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
