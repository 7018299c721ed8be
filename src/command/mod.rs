//! Command intake for the bridge
//!
//! This module handles:
//! - Receiving `#` commands from the orchestrator and the chat hook
//! - Validating and rejecting bad or unserviceable commands
//! - Dispatching remote commands through the game chat
//! - Arming the navigation state machine

mod intake;

pub use intake::{CommandIntake, CommandResult};
