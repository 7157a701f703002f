//! Session and execution errors.

use cable_core::{KernelError, ProvisionError};
use cable_transport::TransportError;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
    #[error("Could not open kernel channels: {0}")]
    Dial(#[source] TransportError),
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),
    #[error("Kernel is busy and could not be interrupted: {0}")]
    Busy(#[source] ProvisionError),
    #[error("Session is closed")]
    Closed,
    #[error("Session has no kernel")]
    NoKernel,
}

/// Outcome of an execution that did not complete cleanly.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The executed code raised.
    #[error("{0}")]
    Kernel(KernelError),
    /// The session failed while the execution was pending.
    #[error("Session fault: {0}")]
    Fault(String),
    /// The stream ended without a terminal record.
    #[error("Execution {0} ended without a reply")]
    Unterminated(Uuid),
}
