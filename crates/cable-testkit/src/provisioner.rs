//! Control plane that records calls instead of making them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use cable_core::{KernelInfo, KernelState, ProvisionError, Provisioner};
use uuid::Uuid;

/// Provisioner that counts calls and fails on request.
#[derive(Debug)]
pub struct RecordingProvisioner {
    kernel_id: Uuid,
    creates: AtomicUsize,
    lists: AtomicUsize,
    interrupts: AtomicUsize,
    deletes: AtomicUsize,
    fail_create: AtomicBool,
    fail_interrupt: AtomicBool,
}

impl Default for RecordingProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingProvisioner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kernel_id: Uuid::new_v4(),
            creates: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_interrupt: AtomicBool::new(false),
        }
    }

    /// Id handed out by `create_kernel`.
    #[must_use]
    pub const fn kernel_id(&self) -> Uuid {
        self.kernel_id
    }

    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_interrupts(&self) {
        self.fail_interrupt.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn info(&self, name: &str) -> KernelInfo {
        KernelInfo {
            id: self.kernel_id,
            name: name.to_string(),
            execution_state: Some(KernelState::Starting),
            last_activity: None,
            connections: 0,
        }
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn create_kernel(&self, name: &str) -> Result<KernelInfo, ProvisionError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProvisionError::Status {
                status: 503,
                body: "no capacity".to_string(),
            });
        }
        Ok(self.info(name))
    }

    async fn list_kernels(&self) -> Result<Vec<KernelInfo>, ProvisionError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.info("python3")])
    }

    async fn interrupt_kernel(&self, id: Uuid) -> Result<(), ProvisionError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        if self.fail_interrupt.load(Ordering::SeqCst) {
            return Err(ProvisionError::Request(format!("interrupt {id}: connection reset")));
        }
        Ok(())
    }

    async fn delete_kernel(&self, id: Uuid) -> Result<(), ProvisionError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Recorded delete of {id}");
        Ok(())
    }
}
