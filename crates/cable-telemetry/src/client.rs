//! Buffered client for the batch ingestion endpoint.

use std::sync::{Mutex, PoisonError};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use reqwest::{StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::events::{Event, Observation, Span, Trace};

/// Host used when none is configured.
pub const CLOUD_HOST: &str = "https://cloud.langfuse.com";

const INGESTION_PATH: &str = "/api/public/ingestion";

/// Telemetry error.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("{0} is required")]
    MissingKey(&'static str),
    #[error("Invalid telemetry host: {0}")]
    InvalidHost(String),
    #[error("Observation has no trace id")]
    MissingTrace,
    #[error("Ingestion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Ingestion failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{} events failed to ingest", .0.len())]
    Batch(Vec<IngestionFailure>),
}

/// Per-event failure reported in a partial-success response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestionFailure {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionFailure>,
}

/// Connection settings.
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    /// Base URL; [`CLOUD_HOST`] when empty.
    pub host: String,
    pub public_key: String,
    pub secret_key: String,
    /// Preconfigured HTTP client (timeouts, proxies).
    pub http: Option<reqwest::Client>,
}

impl TelemetryOptions {
    /// Read `LANGFUSE_HOST`, `LANGFUSE_PUBLIC_KEY` and `LANGFUSE_SECRET_KEY`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            host: lookup("LANGFUSE_HOST").unwrap_or_default(),
            public_key: lookup("LANGFUSE_PUBLIC_KEY").unwrap_or_default(),
            secret_key: lookup("LANGFUSE_SECRET_KEY").unwrap_or_default(),
            http: None,
        }
    }
}

/// Buffers observations and ships them in batches.
///
/// Nothing is sent until [`Self::flush`]. A flush that fails for transport
/// or server reasons puts its events back at the head of the buffer; a
/// partial rejection drops them.
pub struct TelemetryClient {
    http: reqwest::Client,
    ingestion_url: Url,
    authorization: String,
    buffer: Mutex<Vec<Observation>>,
}

impl TelemetryClient {
    /// # Errors
    /// Returns error if a key is missing or the host is not a URL.
    pub fn new(options: TelemetryOptions) -> Result<Self, TelemetryError> {
        if options.public_key.is_empty() {
            return Err(TelemetryError::MissingKey("public key"));
        }
        if options.secret_key.is_empty() {
            return Err(TelemetryError::MissingKey("secret key"));
        }
        let host = if options.host.is_empty() {
            CLOUD_HOST
        } else {
            options.host.as_str()
        };
        let mut ingestion_url =
            Url::parse(host).map_err(|e| TelemetryError::InvalidHost(format!("{host}: {e}")))?;
        let base = ingestion_url.path().trim_end_matches('/').to_string();
        ingestion_url.set_path(&format!("{base}{INGESTION_PATH}"));

        let credentials = BASE64.encode(format!("{}:{}", options.public_key, options.secret_key));
        Ok(Self {
            http: options.http.unwrap_or_default(),
            ingestion_url,
            authorization: format!("Basic {credentials}"),
            buffer: Mutex::new(Vec::with_capacity(64)),
        })
    }

    /// Queue an observation for the next flush.
    pub fn ingest(&self, observation: impl Into<Observation>) {
        self.lock().push(observation.into());
    }

    /// Number of queued observations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Assign an id and timestamp if missing, then queue the trace.
    pub fn trace(&self, mut trace: Trace) -> Trace {
        if trace.id.is_empty() {
            trace.id = Uuid::new_v4().to_string();
        }
        trace.timestamp.get_or_insert_with(Utc::now);
        self.ingest(trace.clone());
        trace
    }

    /// Queue a started span.
    ///
    /// # Errors
    /// Returns [`TelemetryError::MissingTrace`] if the span has no trace id.
    pub fn span(&self, mut span: Span) -> Result<Span, TelemetryError> {
        if span.trace_id.is_empty() {
            return Err(TelemetryError::MissingTrace);
        }
        if span.id.is_empty() {
            span.id = Uuid::new_v4().to_string();
        }
        span.started_at.get_or_insert_with(Utc::now);
        self.ingest(span.clone());
        Ok(span)
    }

    /// Start `child` under `parent`, inheriting its trace.
    ///
    /// # Errors
    /// Returns [`TelemetryError::MissingTrace`] if the parent has no trace id.
    pub fn child_span(&self, parent: &Span, mut child: Span) -> Result<Span, TelemetryError> {
        child.trace_id.clone_from(&parent.trace_id);
        child.parent_observation_id.clone_from(&parent.id);
        self.span(child)
    }

    /// Mark the span ended and queue the update.
    pub fn end_span(&self, span: &mut Span) {
        span.ended_at = Some(Utc::now());
        self.ingest(span.clone());
    }

    /// Queue a point-in-time event.
    ///
    /// # Errors
    /// Returns [`TelemetryError::MissingTrace`] if the event has no trace id.
    pub fn event(&self, mut event: Event) -> Result<Event, TelemetryError> {
        if event.trace_id.is_empty() {
            return Err(TelemetryError::MissingTrace);
        }
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        event.start_time.get_or_insert_with(Utc::now);
        self.ingest(event.clone());
        Ok(event)
    }

    /// Send every queued observation in one batch.
    ///
    /// # Errors
    /// Returns [`TelemetryError::Batch`] if the server rejected some events
    /// (those are dropped), or a request/status error (all events are
    /// re-queued ahead of anything ingested meanwhile).
    pub async fn flush(&self) -> Result<(), TelemetryError> {
        let events = std::mem::take(&mut *self.lock());
        if events.is_empty() {
            return Ok(());
        }

        match self.send_batch(&events).await {
            Ok(()) => {
                tracing::debug!("Flushed {} telemetry events", events.len());
                Ok(())
            }
            Err(e @ TelemetryError::Batch(_)) => {
                tracing::warn!("Dropping telemetry batch: {e}");
                Err(e)
            }
            Err(e) => {
                tracing::warn!("Telemetry flush failed, re-queueing {} events: {e}", events.len());
                let mut buffer = self.lock();
                let newer = std::mem::replace(&mut *buffer, events);
                buffer.extend(newer);
                Err(e)
            }
        }
    }

    async fn send_batch(&self, events: &[Observation]) -> Result<(), TelemetryError> {
        let batch: Vec<Value> = events
            .iter()
            .map(|event| {
                json!({
                    "id": event.id(),
                    "type": event.kind(),
                    "timestamp": event.timestamp(),
                    "body": event,
                })
            })
            .collect();

        let response = self
            .http
            .post(self.ingestion_url.clone())
            .header(AUTHORIZATION, &self.authorization)
            .json(&json!({ "batch": batch }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::MULTI_STATUS => {
                let body: IngestionResponse = response.json().await?;
                if body.errors.is_empty() {
                    Ok(())
                } else {
                    Err(TelemetryError::Batch(body.errors))
                }
            }
            status => Err(TelemetryError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Observation>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
