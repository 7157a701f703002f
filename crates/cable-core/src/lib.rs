//! Core protocol types for persistent kernel sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - The framed unit exchanged over the kernel channels socket
//! - `OutputRecord` - Normalized execution output decoded from an envelope
//! - `KernelState` - Execution state reported by the kernel
//! - `OutputFeed` - Broadcast + history feed of every published record
//! - `Provisioner` - Control-plane trait for creating and managing kernels

pub mod envelope;
pub mod feed;
pub mod record;
pub mod state;
pub mod traits;

pub use envelope::{Envelope, Header};
pub use feed::OutputFeed;
pub use record::{BinaryPayload, KernelError, MimeBundle, OutputRecord, RecordError};
pub use state::KernelState;
pub use traits::{KernelInfo, ProvisionError, Provisioner};
