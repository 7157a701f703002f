//! Batched telemetry for kernel sessions.
//!
//! Provides:
//! - `TelemetryClient` - Buffers observations and flushes them in batches
//! - `Trace` / `Span` / `Event` - Observation types accepted by the ingestion API
//! - `observe` - Turns a session's output feed into trace events

pub mod client;
pub mod events;
pub mod observe;

pub use client::{TelemetryClient, TelemetryError, TelemetryOptions};
pub use events::{Event, EventKind, Level, Observation, Span, Trace};
pub use observe::observe;
