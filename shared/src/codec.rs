//! Envelope codec
//!
//! Every message on the wire is a JSON envelope:
//! ```text
//! { "endpoint": "<string>", "data": <any JSON>, "timestamp": <i64 ms>, "session_id": "<opt>" }
//! ```
//!
//! Stream transports additionally frame envelopes as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: JSON envelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::endpoints;

/// Maximum frame size (1 MiB)
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Key injected into outbound payload objects
pub const SESSION_ID_KEY: &str = "session_id";

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_endpoint() -> String {
    endpoints::DEFAULT.to_string()
}

/// Wire wrapper carrying endpoint, payload and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Envelope {
    /// Build an outbound envelope, stamping it with the session id if one is active
    pub fn outbound(endpoint: impl Into<String>, data: Value, session_id: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.into(),
            data: enrich(data, session_id),
            timestamp: crate::now_ms() as i64,
            session_id: session_id.map(str::to_string),
        }
    }

    /// Look up a string field inside the payload
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Inject `session_id` into a payload object that lacks one.
///
/// Non-objects, objects that already carry the key, and calls without an
/// active session return the payload unchanged, so `enrich(enrich(x)) == enrich(x)`.
pub fn enrich(mut data: Value, session_id: Option<&str>) -> Value {
    let Some(sid) = session_id.filter(|s| !s.trim().is_empty()) else {
        return data;
    };
    if let Value::Object(ref mut map) = data {
        map.entry(SESSION_ID_KEY)
            .or_insert_with(|| Value::String(sid.to_string()));
    }
    data
}

/// Serialize an envelope to JSON bytes (no framing)
pub fn to_json(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Parse an envelope from JSON bytes (no framing)
///
/// Missing `endpoint`, `timestamp` and `session_id` are tolerated.
pub fn from_json(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode an Envelope into a length-prefixed byte buffer
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(envelope, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an Envelope directly into a provided buffer
pub fn encode_into(envelope: &Envelope, buf: &mut BytesMut) -> Result<(), CodecError> {
    let body = to_json(envelope)?;

    if body.len() > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(body.len()));
    }

    buf.reserve(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    Ok(())
}

/// Try to split one length-prefixed frame off the buffer
///
/// Returns:
/// - `Ok(Some(bytes))` if a complete frame was available
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the length prefix is invalid
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    Ok(Some(buf.split_to(msg_len as usize).freeze()))
}

/// Try to decode a length-prefixed Envelope from a buffer
///
/// A complete frame whose body is not a valid envelope is consumed and
/// reported as an error so the stream can carry on past it.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    match decode_frame(buf)? {
        Some(frame) => Ok(Some(from_json(&frame)?)),
        None => Ok(None),
    }
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to split the next raw frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, CodecError> {
        decode_frame(&mut self.buffer)
    }

    /// Try to decode the next envelope from the buffer
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
