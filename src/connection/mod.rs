//! Connection management for the orchestrator link
//!
//! This module handles:
//! - Authentication and the persistent inbound stream
//! - Reconnection with a fixed delay under a cancellable supervisor
//! - Endpoint-keyed inbound dispatch
//! - Session-enriched outbound publishing through a single writer

mod manager;

pub use manager::{
    ClientConfig, ConnectionEvent, ConnectionState, LinkStatus, MessageHandler, TransportClient,
};

#[cfg(test)]
pub(crate) use manager::tests as test_support;
