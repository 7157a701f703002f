//! WebSocket transport for gateway kernel channels.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cable_core::Envelope;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::watch, time::Instant};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use url::Url;

use crate::{ChannelPair, Connector, EnvelopeSink, EnvelopeSource, PongWait, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials gateway channel sockets over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    token: Option<String>,
}

impl WsConnector {
    /// Connector without authentication.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector sending `Authorization: token <token>` on the upgrade.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<ChannelPair, TransportError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|e| TransportError::Dial(format!("invalid token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Dial(format!("{url}: {e}")))?;
        tracing::debug!("Connected to {url}");

        let (sink, source) = stream.split();
        let (pong_tx, pong_rx) = watch::channel(Bytes::new());
        Ok(ChannelPair {
            sink: Box::new(WsSink {
                sink,
                pongs: pong_rx,
                probes: 0,
            }),
            source: Box::new(WsSource {
                source,
                pongs: pong_tx,
            }),
        })
    }
}

/// Write half of a WebSocket connection.
pub struct WsSink {
    sink: SplitSink<WsStream, Message>,
    /// Payload of the last Pong seen by the read half.
    pongs: watch::Receiver<Bytes>,
    probes: u64,
}

#[async_trait]
impl EnvelopeSink for WsSink {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let json = serde_json::to_string(envelope)?;
        self.sink
            .send(Message::Text(json.into()))
            .await
            .map_err(socket_error)
    }

    async fn ping(&mut self, timeout: Duration) -> Result<PongWait, TransportError> {
        let deadline = Instant::now() + timeout;
        self.probes += 1;
        let payload = Bytes::copy_from_slice(&self.probes.to_be_bytes());

        tokio::time::timeout_at(deadline, self.sink.send(Message::Ping(payload.clone())))
            .await
            .map_err(|_| TransportError::PingTimeout(timeout))?
            .map_err(socket_error)?;

        // Pongs only surface while the read half is being polled.
        let mut pongs = self.pongs.clone();
        Ok(Box::pin(async move {
            let answered = tokio::time::timeout_at(deadline, async {
                loop {
                    let matched = *pongs.borrow_and_update() == payload;
                    if matched {
                        return Ok::<(), watch::error::RecvError>(());
                    }
                    pongs.changed().await?;
                }
            })
            .await;
            match answered {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::PingTimeout(timeout)),
            }
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(socket_error(e)),
        }
    }
}

/// Read half of a WebSocket connection.
pub struct WsSource {
    source: SplitStream<WsStream>,
    pongs: watch::Sender<Bytes>,
}

#[async_trait]
impl EnvelopeSource for WsSource {
    async fn next(&mut self) -> Result<Option<Envelope>, TransportError> {
        while let Some(message) = self.source.next().await {
            match message.map_err(socket_error)? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                Message::Binary(data) => {
                    // Binary frames carry buffer-bearing messages (widgets), not execution output.
                    tracing::debug!("Skipping binary frame of {} bytes", data.len());
                }
                Message::Close(frame) => {
                    tracing::debug!("Peer closed channels socket: {frame:?}");
                    return Ok(None);
                }
                Message::Pong(payload) => {
                    self.pongs.send_replace(payload);
                }
                Message::Ping(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }
}

fn socket_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Socket(other.to_string()),
    }
}
