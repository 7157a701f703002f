//! Envelope transports for kernel channel sockets.
//!
//! Provides:
//! - `EnvelopeSink` / `EnvelopeSource` - The two halves a session drives
//! - `Connector` - Dials a channels URL into a sink/source pair
//! - WebSocket transport (feature: websocket)
//! - In-memory transport for tests and embedding (feature: memory)

use std::time::Duration;

use async_trait::async_trait;
use cable_core::Envelope;
use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::WsConnector;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Dial failed: {0}")]
    Dial(String),
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Ping timed out after {0:?}")]
    PingTimeout(Duration),
    #[error("Transport closed")]
    Closed,
}

/// Outstanding liveness probe; resolves once the peer answers.
pub type PongWait = BoxFuture<'static, Result<(), TransportError>>;

/// Write half of a kernel connection.
#[async_trait]
pub trait EnvelopeSink: Send {
    /// Write one envelope.
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Send a liveness probe.
    ///
    /// Only the write happens here. The returned [`PongWait`] completes when
    /// the peer answers and fails with [`TransportError::PingTimeout`] once
    /// `timeout` has passed since the call, so callers can await it without
    /// holding the sink.
    async fn ping(&mut self, timeout: Duration) -> Result<PongWait, TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a kernel connection.
#[async_trait]
pub trait EnvelopeSource: Send {
    /// Next inbound envelope, or `None` once the peer has closed.
    async fn next(&mut self) -> Result<Option<Envelope>, TransportError>;
}

/// An open connection, split into its halves.
pub struct ChannelPair {
    pub sink: Box<dyn EnvelopeSink>,
    pub source: Box<dyn EnvelopeSource>,
}

/// Dials kernel channel sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<ChannelPair, TransportError>;
}

/// Channels socket address for `kernel` behind the gateway at `endpoint`.
///
/// `http` maps to `ws` and `https` to `wss`; any base path and query on
/// the endpoint are kept.
///
/// # Errors
/// Returns error if the endpoint has no host or an unsupported scheme.
pub fn channels_url(endpoint: &Url, kernel: Uuid) -> Result<Url, TransportError> {
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme {other:?}"
            )));
        }
    };
    if endpoint.host_str().is_none_or(str::is_empty) {
        return Err(TransportError::InvalidEndpoint(format!(
            "{endpoint} has no host"
        )));
    }

    let mut url = endpoint.clone();
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidEndpoint(format!("cannot use {scheme} for {endpoint}")))?;
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}/api/kernels/{kernel}/channels"));
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_url_http() {
        let id = Uuid::new_v4();
        let endpoint = Url::parse("http://192.168.65.4:8888").unwrap();
        let url = channels_url(&endpoint, id).unwrap();
        assert_eq!(
            url.as_str(),
            format!("ws://192.168.65.4:8888/api/kernels/{id}/channels")
        );
    }

    #[test]
    fn test_channels_url_https_with_base_path() {
        let id = Uuid::new_v4();
        let endpoint = Url::parse("https://gateway.example.com/jupyter/?token=x").unwrap();
        let url = channels_url(&endpoint, id).unwrap();
        assert_eq!(
            url.as_str(),
            format!("wss://gateway.example.com/jupyter/api/kernels/{id}/channels?token=x")
        );
    }

    #[test]
    fn test_channels_url_rejects_other_schemes() {
        let endpoint = Url::parse("ftp://gateway.example.com").unwrap();
        assert!(matches!(
            channels_url(&endpoint, Uuid::new_v4()),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
