pub mod sse;
pub mod tcp;
pub mod traits;

use std::sync::Arc;

use crate::config::{BackendKind, BridgeConfig};

pub use sse::HttpSseBackend;
pub use tcp::TcpBrokerBackend;
pub use traits::{AuthToken, Credentials, InboundMessage, InboundStream, TransportBackend};

/// Build the backend selected by the configuration
pub fn backend_from_config(config: &BridgeConfig) -> Arc<dyn TransportBackend> {
    match config.backend {
        BackendKind::HttpSse => Arc::new(
            HttpSseBackend::new(config.base_url.clone()).with_request_timeout(config.request_timeout()),
        ),
        BackendKind::TcpBroker => Arc::new(
            TcpBrokerBackend::new(config.broker_addr.clone()).with_write_timeout(config.request_timeout()),
        ),
    }
}
