//! JSON payload builders for the bridge's wire events

use auton8_shared::{now_ms, NavSnapshot};
use serde_json::{json, Value};

/// Event names published on the events endpoint
pub mod event {
    pub const STATUS: &str = "status";
    pub const SESSION_START: &str = "session_start";
    pub const SESSION_END: &str = "session_end";
    /// Unconditional trace written when a command is dispatched
    pub const ACCEPTED: &str = "accepted";
    pub const CMD_REJECT: &str = "cmd_reject";
    pub const ERROR: &str = "error";
}

/// Inbound `cmd` payload type carrying a chat command
pub const BARITONE_CMD_TYPE: &str = "baritone_cmd";

/// `{"type":"event","event":<name>,"detail":<detail>,"ts":<ms>}`
pub fn event_payload(name: &str, detail: &str) -> Value {
    json!({
        "type": "event",
        "event": name,
        "detail": detail,
        "ts": now_ms(),
    })
}

/// Session lifecycle event with an extra timestamp field (`started_at` / `ended_at`)
pub fn session_payload(name: &str, session_id: &str, stamp_key: &str, stamp_ms: u64) -> Value {
    let mut payload = event_payload(name, session_id);
    payload[stamp_key] = json!(stamp_ms);
    payload
}

/// Navigation snapshot tagged with its payload type
pub fn snapshot_payload(snapshot: &NavSnapshot) -> Value {
    let mut payload = serde_json::to_value(snapshot).unwrap_or_else(|_| json!({}));
    if let Value::Object(ref mut map) = payload {
        map.insert("type".into(), json!("baritone_state"));
    }
    payload
}

/// Inbound `cmd` payload, classified by its `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePayload<'a> {
    /// `{"type":"baritone_cmd","cmd":"..."}`
    Command(&'a str),
    /// `baritone_cmd` whose `cmd` is missing or not a string
    Malformed,
    /// Any other payload type
    Other,
}

/// Classify an inbound `cmd` payload
pub fn parse_remote_command(data: &Value) -> RemotePayload<'_> {
    if data.get("type").and_then(Value::as_str) != Some(BARITONE_CMD_TYPE) {
        return RemotePayload::Other;
    }
    match data.get("cmd").and_then(Value::as_str) {
        Some(text) => RemotePayload::Command(text),
        None => RemotePayload::Malformed,
    }
}
