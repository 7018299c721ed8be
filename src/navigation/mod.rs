//! Navigation observer wiring
//!
//! The pure state machine lives in `auton8_shared::state_machine`; this
//! module drives it from a fixed-rate tick and connects it to the game
//! through two narrow collaborator traits.

mod monitor;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use auton8_shared::{NavStateMachine, Vec3};

pub use monitor::{MonitorHandle, NavigationMonitor};

/// Where a command string came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Typed by the operator and observed through the chat hook
    Local,
    /// Received from the orchestrator
    Remote,
    /// Re-issued automatically after a stuck detection
    Retry,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::Local => write!(f, "local"),
            CommandSource::Remote => write!(f, "remote"),
            CommandSource::Retry => write!(f, "retry"),
        }
    }
}

/// Reads the avatar position
pub trait AvatarProbe: Send + Sync {
    /// Current position, or `None` when there is no player
    fn position(&self) -> Option<Vec3>;
}

/// Transmits a command string through the game chat
pub trait ChatSender: Send + Sync {
    fn send(&self, text: &str, source: CommandSource);
}

/// The state machine shared by the tick driver and command intake
pub type NavHandle = Arc<Mutex<NavStateMachine>>;

/// Lock the state machine, recovering from a poisoned lock
pub fn lock_nav(handle: &NavHandle) -> MutexGuard<'_, NavStateMachine> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
