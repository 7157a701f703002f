//! Control-plane trait for kernel provisioning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::KernelState;

/// Kernel model returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    /// Kernel identity.
    pub id: Uuid,
    /// Kernel type name (e.g. `python3`).
    #[serde(default)]
    pub name: String,
    /// Execution state at the time of the call.
    #[serde(default)]
    pub execution_state: Option<KernelState>,
    /// Last activity timestamp, as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    /// Number of open channel connections.
    #[serde(default)]
    pub connections: u32,
}

/// Provisioning error.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Kernel not found: {0}")]
    NotFound(Uuid),
}

/// Trait for kernel control planes.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start a new kernel of the given type.
    async fn create_kernel(&self, name: &str) -> Result<KernelInfo, ProvisionError>;

    /// List running kernels.
    async fn list_kernels(&self) -> Result<Vec<KernelInfo>, ProvisionError>;

    /// Interrupt the kernel's current execution.
    async fn interrupt_kernel(&self, id: Uuid) -> Result<(), ProvisionError>;

    /// Shut the kernel down and release its resources.
    async fn delete_kernel(&self, id: Uuid) -> Result<(), ProvisionError>;
}
