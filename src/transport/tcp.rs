//! TCP broker backend
//!
//! One TCP connection carries length-prefixed JSON envelopes in both
//! directions. The first frame is an `auth` envelope carrying the
//! credentials; the broker answers with an `auth` envelope whose data
//! carries `token`. Every later inbound frame may carry a top-level
//! `"event"` field naming its message class.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use auton8_shared::{codec::{self, FrameDecoder}, link, Envelope};
use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::transport::traits::{AuthToken, Credentials, InboundMessage, InboundStream, TransportBackend};

/// Endpoint of the handshake frames
pub const AUTH_ENDPOINT: &str = "auth";

/// Read half left over from the handshake, with any bytes already buffered
struct PendingReader {
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
}

/// Backend speaking the framed envelope protocol to a broker
pub struct TcpBrokerBackend {
    address: String,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: Mutex<Option<PendingReader>>,
    write_timeout: Duration,
}

impl TcpBrokerBackend {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            writer: Mutex::new(None),
            pending: Mutex::new(None),
            write_timeout: Duration::from_millis(link::REQUEST_TIMEOUT_MS),
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }
}

/// Read frames until one complete frame is available
async fn read_frame(reader: &mut OwnedReadHalf, decoder: &mut FrameDecoder) -> Result<Bytes> {
    let mut read_buf = vec![0u8; 4096];
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            bail!("broker closed connection");
        }
        decoder.extend(&read_buf[..n]);
    }
}

/// Parse one frame body; `None` for bodies that are not valid envelopes
fn parse_frame(frame: &[u8]) -> Option<InboundMessage> {
    let value: Value = match serde_json::from_slice(frame) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, "dropping malformed frame");
            return None;
        }
    };
    let class = value
        .get("event")
        .and_then(Value::as_str)
        .map(str::to_string);
    let envelope: Envelope = serde_json::from_value(value).ok()?;

    let msg = InboundMessage::new(envelope);
    Some(match class {
        Some(class) => msg.with_class(class),
        None => msg,
    })
}

#[async_trait]
impl TransportBackend for TcpBrokerBackend {
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connect to broker {}", self.address))?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = Envelope::outbound(
            AUTH_ENDPOINT,
            serde_json::to_value(credentials)?,
            credentials.session_id.as_deref(),
        );
        writer.write_all(&codec::encode(&hello)?).await?;

        let mut decoder = FrameDecoder::new();
        let token = loop {
            let frame = read_frame(&mut reader, &mut decoder).await?;
            let Some(msg) = parse_frame(&frame) else {
                continue;
            };
            if msg.envelope.endpoint != AUTH_ENDPOINT {
                trace!(endpoint = %msg.envelope.endpoint, "skipping frame before auth reply");
                continue;
            }
            match msg.envelope.data_str("token") {
                Some(token) if !token.is_empty() => break token.to_string(),
                _ => bail!("broker refused credentials"),
            }
        };
        debug!(addr = %self.address, "broker handshake complete");

        *self.writer.lock().await = Some(writer);
        *self.pending.lock().await = Some(PendingReader { reader, decoder });

        Ok(AuthToken {
            token,
            session_id: credentials.session_id.clone(),
        })
    }

    async fn open_stream(&self, _token: &AuthToken) -> Result<InboundStream> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("open_stream called before authenticate"))?;

        let stream = futures::stream::unfold(Some(pending), |state| async move {
            let mut state = state?;
            loop {
                match read_frame(&mut state.reader, &mut state.decoder).await {
                    Ok(frame) => {
                        if let Some(msg) = parse_frame(&frame) {
                            return Some((Ok(msg), Some(state)));
                        }
                    }
                    Err(e) => return Some((Err(e), None)),
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn send(&self, _token: &AuthToken, envelope: &Envelope) -> Result<()> {
        let encoded = codec::encode(envelope)?;
        let mut writer = self.writer.lock().await;
        let half = writer.as_mut().ok_or_else(|| anyhow!("broker not connected"))?;
        let outcome = timeout(self.write_timeout, half.write_all(&encoded)).await;
        match outcome {
            Ok(result) => Ok(result?),
            Err(_) => {
                // A partial frame may be on the wire; the connection is unusable
                *writer = None;
                bail!("broker write timed out after {:?}", self.write_timeout)
            }
        }
    }

    fn name(&self) -> &'static str {
        "tcp_broker"
    }
}
