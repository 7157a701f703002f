//! Persistent kernel sessions.
//!
//! Provides:
//! - `KernelSession` - Start, execute against, interrupt and shut down a kernel
//! - `Execution` - Per-submission stream of output records
//! - `SessionConfig` - Gateway endpoint, kernel identity and keepalive settings

pub mod config;
pub mod error;
pub mod execution;
mod reader;
mod routes;
pub mod session;
mod watchdog;

pub use config::{ConfigError, SessionConfig};
pub use error::{ExecutionError, SessionError};
pub use execution::{Completion, Execution};
pub use session::KernelSession;
