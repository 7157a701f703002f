//! Kernel session lifecycle and execution.

use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use cable_core::{Envelope, KernelState, OutputFeed, OutputRecord, Provisioner};
use cable_gateway::GatewayClient;
use cable_transport::{ChannelPair, Connector, EnvelopeSink, WsConnector, channels_url};
use futures::stream::BoxStream;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::{
    config::{ConfigError, SessionConfig},
    error::SessionError,
    execution::Execution,
    reader,
    routes::RouteTable,
    watchdog,
};

/// State shared between a session's handles and its background tasks.
pub(crate) struct Shared {
    kernel_id: RwLock<Option<Uuid>>,
    name: String,
    user: String,
    pub(crate) label: String,
    provisioner: Arc<dyn Provisioner>,
    pub(crate) sink: Mutex<Option<Box<dyn EnvelopeSink>>>,
    pub(crate) state: watch::Sender<KernelState>,
    pub(crate) routes: RouteTable,
    pub(crate) feed: OutputFeed,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn kernel_id(&self) -> Option<Uuid> {
        *self.kernel_id.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the transport and end every stream. Idempotent.
    pub(crate) async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Tearing down session {}", self.label);

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!("Closing kernel channels: {e}");
            }
        }
        self.routes.close_all();
        self.feed.close();
        self.cancel.cancel();
    }
}

/// A persistent connection to one remote kernel.
///
/// Cheap to clone; every clone drives the same session. The background tasks
/// stop when the session is closed or the last handle is dropped.
#[derive(Clone)]
pub struct KernelSession {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl fmt::Debug for KernelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSession")
            .field("kernel_id", &self.kernel_id())
            .field("label", &self.shared.label)
            .field("state", &self.state())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl KernelSession {
    /// Provision (or attach to) a kernel behind a Kernel Gateway and open its
    /// channels.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, provisioning fails or
    /// the channels socket cannot be opened.
    pub async fn start(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let mut gateway = GatewayClient::new(&config.endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))?;
        let connector = match &config.token {
            Some(token) => {
                gateway = gateway.with_token(token.clone());
                WsConnector::with_token(token.clone())
            }
            None => WsConnector::new(),
        };
        Self::start_with(config, Arc::new(gateway), &connector).await
    }

    /// Start a session with an explicit control plane and transport.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, provisioning fails or
    /// the connector cannot dial.
    pub async fn start_with(
        config: SessionConfig,
        provisioner: Arc<dyn Provisioner>,
        connector: &dyn Connector,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let (id, initial) = match config.kernel_id {
            Some(id) => (id, KernelState::Unknown),
            None => {
                let kernel = provisioner.create_kernel(&config.kernel_name).await?;
                (kernel.id, kernel.execution_state.unwrap_or_default())
            }
        };

        let url = channels_url(&config.endpoint, id).map_err(SessionError::Dial)?;
        let ChannelPair { sink, source } = connector
            .connect(&url)
            .await
            .map_err(SessionError::Dial)?;

        let label = if config.session.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            config.session
        };
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            kernel_id: RwLock::new(Some(id)),
            name: config.kernel_name,
            user: config.user,
            label,
            provisioner,
            sink: Mutex::new(Some(sink)),
            state,
            routes: RouteTable::new(),
            feed: OutputFeed::new(),
            closed: AtomicBool::new(false),
            cancel: cancel.clone(),
        });

        tokio::spawn(reader::run(Arc::clone(&shared), source, cancel.clone()));
        if let Some(every) = config.keepalive.filter(|d| !d.is_zero()) {
            tokio::spawn(watchdog::run(
                Arc::clone(&shared),
                every,
                config.ping_timeout,
                cancel.clone(),
            ));
        }
        tracing::info!(
            "Session {} attached to {} kernel {id} at {url}",
            shared.label,
            shared.name
        );

        Ok(Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        })
    }

    /// Submit `code` without tracking its output; returns the correlation id.
    ///
    /// If the kernel is busy it is interrupted once first.
    ///
    /// # Errors
    /// Returns [`SessionError::Busy`] if the interrupt fails (nothing is
    /// written), or a transport error if the write fails.
    pub async fn submit(&self, code: &str) -> Result<Uuid, SessionError> {
        let id = Uuid::new_v4();
        self.submit_as(id, code).await?;
        Ok(id)
    }

    /// Submit `code` and stream back the records correlated to it.
    ///
    /// # Errors
    /// Same as [`Self::submit`].
    pub async fn execute(&self, code: &str) -> Result<Execution, SessionError> {
        let id = Uuid::new_v4();
        let records = self.shared.routes.register(id).ok_or(SessionError::Closed)?;
        if let Err(e) = self.submit_as(id, code).await {
            self.shared.routes.remove(id);
            return Err(e);
        }
        Ok(Execution::new(id, records))
    }

    async fn submit_as(&self, id: Uuid, code: &str) -> Result<(), SessionError> {
        let kernel = self.shared.kernel_id().ok_or(SessionError::NoKernel)?;
        if !self.is_open() {
            return Err(SessionError::Closed);
        }

        if self.state().is_busy() {
            tracing::info!("Kernel {kernel} busy, interrupting before submit");
            self.shared
                .provisioner
                .interrupt_kernel(kernel)
                .await
                .map_err(SessionError::Busy)?;
        }

        let envelope = Envelope::execute_request(id, code, &self.shared.user, &self.shared.label);
        let mut sink = self.shared.sink.lock().await;
        let sink = sink.as_mut().ok_or(SessionError::Closed)?;
        sink.send(&envelope).await.map_err(SessionError::Transport)?;
        tracing::debug!("Submitted {id} to kernel {kernel}");
        Ok(())
    }

    /// Interrupt whatever the kernel is running.
    ///
    /// # Errors
    /// Returns error if there is no kernel or the control plane call fails.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        let kernel = self.shared.kernel_id().ok_or(SessionError::NoKernel)?;
        self.shared.provisioner.interrupt_kernel(kernel).await?;
        Ok(())
    }

    /// Delete the kernel and close the session.
    ///
    /// # Errors
    /// Returns error if there is no kernel or deletion fails; the session is
    /// left open in that case.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let kernel = self.shared.kernel_id().ok_or(SessionError::NoKernel)?;
        self.shared.provisioner.delete_kernel(kernel).await?;
        self.shared
            .kernel_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared.teardown().await;
        Ok(())
    }

    /// Close the channels socket and end every stream. Idempotent.
    ///
    /// # Errors
    /// Never fails today; kept fallible for transports with a close handshake.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.shared.teardown().await;
        Ok(())
    }

    /// Every record the session publishes, faults included, starting with
    /// retained history. Ends when the session closes.
    #[must_use]
    pub fn listen(&self) -> BoxStream<'static, OutputRecord> {
        self.shared.feed.history_plus_stream()
    }

    /// Last reported execution state.
    #[must_use]
    pub fn state(&self) -> KernelState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<KernelState> {
        self.shared.state.subscribe()
    }

    /// Kernel identity; `None` after [`Self::shutdown`].
    #[must_use]
    pub fn kernel_id(&self) -> Option<Uuid> {
        self.shared.kernel_id()
    }

    #[must_use]
    pub fn kernel_name(&self) -> &str {
        &self.shared.name
    }

    /// Session label written into outbound headers.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }
}
