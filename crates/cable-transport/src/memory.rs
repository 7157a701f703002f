//! In-memory transport.
//!
//! Useful for tests and for embedding a kernel in-process. The connector
//! hands out a single connection; the returned [`KernelSide`] plays the
//! kernel end of it.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use cable_core::Envelope;
use tokio::sync::mpsc;
use url::Url;

use crate::{ChannelPair, Connector, EnvelopeSink, EnvelopeSource, PongWait, TransportError};

#[derive(Default)]
struct Flags {
    fail_pings: AtomicBool,
    closed: AtomicBool,
    pings: AtomicUsize,
    pong_delay: Mutex<Duration>,
}

/// Create a connector and the kernel end of its single connection.
#[must_use]
pub fn pair() -> (MemoryConnector, KernelSide) {
    let (to_kernel_tx, to_kernel_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
    let flags = Arc::new(Flags::default());

    let channels = ChannelPair {
        sink: Box::new(MemorySink {
            tx: to_kernel_tx,
            flags: Arc::clone(&flags),
        }),
        source: Box::new(MemorySource { rx: to_client_rx }),
    };
    let connector = MemoryConnector {
        channels: Mutex::new(Some(channels)),
        dialed: Mutex::new(Vec::new()),
    };
    let kernel = KernelSide {
        rx: to_kernel_rx,
        tx: Some(to_client_tx),
        flags,
    };
    (connector, kernel)
}

/// Connector that yields one pre-built in-memory connection.
pub struct MemoryConnector {
    channels: Mutex<Option<ChannelPair>>,
    dialed: Mutex<Vec<Url>>,
}

impl MemoryConnector {
    /// Connector whose every dial fails.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            channels: Mutex::new(None),
            dialed: Mutex::new(Vec::new()),
        }
    }

    /// URLs this connector was asked to dial.
    #[must_use]
    pub fn dialed(&self) -> Vec<Url> {
        self.dialed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<ChannelPair, TransportError> {
        self.dialed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TransportError::Dial(format!("{url}: connection refused")))
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Envelope>,
    flags: Arc<Flags>,
}

#[async_trait]
impl EnvelopeSink for MemorySink {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.flags.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(envelope.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn ping(&mut self, timeout: Duration) -> Result<PongWait, TransportError> {
        if self.flags.closed.load(Ordering::SeqCst) || self.tx.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.flags.fail_pings.load(Ordering::SeqCst) {
            return Ok(Box::pin(async move {
                tokio::time::sleep(timeout).await;
                Err(TransportError::PingTimeout(timeout))
            }));
        }
        self.flags.pings.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .flags
            .pong_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Box::pin(async move {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(TransportError::PingTimeout(timeout));
            }
            tokio::time::sleep(delay).await;
            Ok(())
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.flags.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Result<Envelope, TransportError>>,
}

#[async_trait]
impl EnvelopeSource for MemorySource {
    async fn next(&mut self) -> Result<Option<Envelope>, TransportError> {
        self.rx.recv().await.transpose()
    }
}

/// Kernel end of an in-memory connection.
pub struct KernelSide {
    rx: mpsc::UnboundedReceiver<Envelope>,
    tx: Option<mpsc::UnboundedSender<Result<Envelope, TransportError>>>,
    flags: Arc<Flags>,
}

impl KernelSide {
    /// Next envelope written by the client.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Envelope written by the client, if one is queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Deliver an envelope to the client.
    ///
    /// Returns `false` once the client's read half is gone.
    pub fn send(&self, envelope: Envelope) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(envelope)).is_ok())
    }

    /// Make the client's next read fail with `error`.
    pub fn fail_read(&self, error: TransportError) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Make every subsequent ping fail.
    pub fn fail_pings(&self) {
        self.flags.fail_pings.store(true, Ordering::SeqCst);
    }

    /// Answer each later ping only after `delay`.
    pub fn delay_pongs(&self, delay: Duration) {
        *self
            .flags
            .pong_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of pings written while pings were not failing.
    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.flags.pings.load(Ordering::SeqCst)
    }

    /// Whether the client closed its write half.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    /// Close the kernel's end; the client reads end-of-stream.
    pub fn hang_up(&mut self) {
        self.tx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_single_connection() {
        let (connector, mut kernel) = pair();
        let url = Url::parse("ws://kernel/api/kernels/1/channels").unwrap();

        let ChannelPair {
            mut sink,
            mut source,
        } = connector.connect(&url).await.unwrap();
        assert!(matches!(
            connector.connect(&url).await,
            Err(TransportError::Dial(_))
        ));
        assert_eq!(connector.dialed().len(), 2);

        let request = Envelope::execute_request(Uuid::new_v4(), "1", "", "");
        sink.send(&request).await.unwrap();
        assert_eq!(kernel.recv().await.unwrap().header, request.header);

        assert!(kernel.send(request.clone()));
        assert!(source.next().await.unwrap().is_some());

        kernel.hang_up();
        assert!(source.next().await.unwrap().is_none());
    }

    #[test]
    fn test_read_half_waits_for_the_kernel() {
        let (connector, mut kernel) = pair();
        let url = Url::parse("ws://kernel").unwrap();
        let ChannelPair { mut source, .. } =
            tokio_test::block_on(connector.connect(&url)).unwrap();

        let mut next = task::spawn(source.next());
        assert_pending!(next.poll());
        assert!(kernel.send(Envelope::execute_request(Uuid::new_v4(), "1", "", "")));
        assert!(next.is_woken());
        assert!(assert_ready!(next.poll()).unwrap().is_some());
        drop(next);

        kernel.hang_up();
        let mut next = task::spawn(source.next());
        assert!(assert_ready!(next.poll()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ping_and_close() {
        let (connector, kernel) = pair();
        let url = Url::parse("ws://kernel").unwrap();
        let mut channels = connector.connect(&url).await.unwrap();

        let pong = channels.sink.ping(Duration::from_secs(1)).await.unwrap();
        pong.await.unwrap();
        assert_eq!(kernel.ping_count(), 1);

        kernel.delay_pongs(Duration::from_millis(200));
        let late = channels.sink.ping(Duration::from_millis(20)).await.unwrap();
        assert!(matches!(late.await, Err(TransportError::PingTimeout(_))));

        kernel.fail_pings();
        let pong = channels.sink.ping(Duration::from_millis(10)).await.unwrap();
        assert!(matches!(pong.await, Err(TransportError::PingTimeout(_))));
        assert_eq!(kernel.ping_count(), 2);

        channels.sink.close().await.unwrap();
        assert!(kernel.is_closed());
        let request = Envelope::execute_request(Uuid::new_v4(), "1", "", "");
        assert!(matches!(
            channels.sink.send(&request).await,
            Err(TransportError::Closed)
        ));
    }
}
