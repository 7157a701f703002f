//! Test doubles for cable sessions.
//!
//! Provides:
//! - `FakeKernel` - Scripted interpreter answering `execute_request`s
//! - `envelopes` - Builders for the kernel's side of the conversation
//! - `RecordingProvisioner` - Counting control plane with failure switches
//! - `FakeGateway` - Kernel Gateway over HTTP + websocket on a local port

pub mod envelopes;
pub mod gateway;
pub mod kernel;
pub mod provisioner;

pub use gateway::FakeGateway;
pub use kernel::FakeKernel;
pub use provisioner::RecordingProvisioner;
