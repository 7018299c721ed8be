//! Transport trait abstraction for pluggable pub/sub backends

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use auton8_shared::Envelope;
use futures::Stream;
use serde::Serialize;

/// Message class that marks a command embedded in general traffic
pub const COMMAND_CLASS: &str = "command";

/// Credentials exchanged for a bearer token
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub client_id: String,
    pub auth_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Bearer token plus the session it was issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub session_id: Option<String>,
}

/// One parsed inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Backend-level message class (SSE `event:` name, or a frame's `event` field)
    pub class: Option<String>,
    pub envelope: Envelope,
}

impl InboundMessage {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            class: None,
            envelope,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Whether this message should also be forwarded to the command handler
    pub fn is_command(&self) -> bool {
        self.class
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(COMMAND_CLASS))
    }
}

/// Live inbound stream. An `Err` item or the end of the stream means the
/// connection is lost.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundMessage>> + Send>>;

/// A pub/sub backend the transport client drives
#[async_trait]
pub trait TransportBackend: Send + Sync + 'static {
    /// Exchange credentials for a token
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken>;

    /// Open the persistent inbound stream
    async fn open_stream(&self, token: &AuthToken) -> Result<InboundStream>;

    /// Deliver one outbound envelope
    async fn send(&self, token: &AuthToken, envelope: &Envelope) -> Result<()>;

    /// Human-readable name for this backend
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_class_detection() {
        let env = Envelope::outbound("events", json!({}), None);
        assert!(!InboundMessage::new(env.clone()).is_command());
        assert!(InboundMessage::new(env.clone()).with_class("command").is_command());
        assert!(InboundMessage::new(env.clone()).with_class("Command").is_command());
        assert!(!InboundMessage::new(env).with_class("message").is_command());
    }

    #[test]
    fn test_credentials_omit_missing_session() {
        let creds = Credentials {
            client_id: "c".into(),
            auth_key: "k".into(),
            session_id: None,
        };
        let value = serde_json::to_value(&creds).unwrap();
        assert!(value.get("session_id").is_none());
        assert_eq!(value["client_id"], "c");
    }
}
