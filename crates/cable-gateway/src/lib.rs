//! Kernel Gateway REST client.
//!
//! Provides:
//! - `GatewayClient` - `Provisioner` over the gateway's `/api/kernels` API

pub mod client;

pub use client::{GatewayClient, GatewayError};
