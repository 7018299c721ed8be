//! HTTP + Server-Sent Events backend
//!
//! - `POST {base}/auth` exchanges credentials for `{"token": ...}`
//! - `GET {base}/events/stream` is the inbound SSE stream
//! - `POST {base}/events` delivers each outbound envelope
//!
//! Requests after auth carry `Authorization: Bearer <token>` and `X-Session-ID`.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use auton8_shared::{codec, link, Envelope};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::RequestBuilder;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::transport::traits::{AuthToken, Credentials, InboundMessage, InboundStream, TransportBackend};

pub const SESSION_HEADER: &str = "X-Session-ID";

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseEvent {
    /// `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Accumulates SSE fields until a blank line dispatches the event
#[derive(Debug, Default)]
struct SseAccumulator {
    event: Option<String>,
    data: Vec<String>,
}

impl SseAccumulator {
    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Split a chunked byte stream into SSE events.
///
/// A read error is yielded once as `Err` and ends the stream.
pub fn sse_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), SseAccumulator::default(), false),
        |(mut stream, mut buffer, mut acc, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };
                    if let Some(event) = acc.push_line(line) {
                        return Some((Ok(event), (stream, buffer, acc, false)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        warn!("SSE stream read error: {e}");
                        let err = anyhow!("SSE stream read error: {e}");
                        return Some((Err(err), (stream, buffer, acc, true)));
                    }
                    None => {
                        // Dispatch a trailing event that lacked its blank line
                        if let Ok(rest) = std::str::from_utf8(&buffer) {
                            let rest = rest.trim_end().to_string();
                            if !rest.is_empty() {
                                acc.push_line(&rest);
                            }
                        }
                        buffer.clear();
                        return acc.flush().map(|event| (Ok(event), (stream, buffer, acc, true)));
                    }
                }
            }
        },
    )
}

/// Turn an SSE event into an inbound message; malformed payloads are dropped
fn to_inbound(event: SseEvent) -> Option<InboundMessage> {
    match codec::from_json(event.data.as_bytes()) {
        Ok(envelope) => {
            let msg = InboundMessage::new(envelope);
            Some(match event.event {
                Some(class) => msg.with_class(class),
                None => msg,
            })
        }
        Err(e) => {
            trace!(error = %e, "dropping malformed SSE payload");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    token: String,
}

/// Backend talking to an HTTP API with an SSE inbound stream
pub struct HttpSseBackend {
    client: reqwest::Client,
    base_url: String,
    /// Bound on auth and publish requests; the SSE stream itself is unbounded
    request_timeout: Duration,
}

impl HttpSseBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_millis(link::CONNECT_TIMEOUT_MS))
                .build()
                .unwrap_or_default(),
            base_url,
            request_timeout: Duration::from_millis(link::REQUEST_TIMEOUT_MS),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, token: &AuthToken) -> RequestBuilder {
        let request = request.bearer_auth(&token.token);
        match &token.session_id {
            Some(sid) => request.header(SESSION_HEADER, sid),
            None => request,
        }
    }
}

#[async_trait]
impl TransportBackend for HttpSseBackend {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken> {
        let response: AuthResponse = self
            .client
            .post(self.url("/auth"))
            .timeout(self.request_timeout)
            .json(credentials)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.token.is_empty() {
            bail!("auth response carried no token");
        }
        debug!(base = %self.base_url, "authenticated");

        Ok(AuthToken {
            token: response.token,
            session_id: credentials.session_id.clone(),
        })
    }

    async fn open_stream(&self, token: &AuthToken) -> Result<InboundStream> {
        let request = self
            .client
            .get(self.url("/events/stream"))
            .header(ACCEPT, "text/event-stream");
        let response = self
            .authorized(request, token)
            .send()
            .await?
            .error_for_status()?;

        let events = sse_events(Box::pin(response.bytes_stream())).filter_map(|item| {
            futures::future::ready(match item {
                Ok(event) => to_inbound(event).map(Ok),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(Box::pin(events))
    }

    async fn send(&self, token: &AuthToken, envelope: &Envelope) -> Result<()> {
        let request = self
            .client
            .post(self.url("/events"))
            .timeout(self.request_timeout)
            .json(envelope);
        self.authorized(request, token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("publish to {} failed: {e}", envelope.endpoint))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http_sse"
    }
}
