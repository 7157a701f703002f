//! Observation types.
//!
//! One observation may be ingested more than once: a span is sent as
//! `span-create` when started and again as `span-update` once it ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ingestion event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TraceCreate,
    SpanCreate,
    SpanUpdate,
    EventCreate,
}

/// Severity of an observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Debug,
    #[default]
    Default,
    Warning,
    Error,
}

/// Top-level grouping of spans and events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Trace {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Timed unit of work inside a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "startTime")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "endTime", default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub level: Level,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_observation_id: String,
}

impl Span {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Point-in-time occurrence inside a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub level: Level,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_observation_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Event {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Anything the client can buffer for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Observation {
    Trace(Trace),
    Span(Span),
    Event(Event),
}

impl Observation {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Trace(t) => &t.id,
            Self::Span(s) => &s.id,
            Self::Event(e) => &e.id,
        }
    }

    /// Type tag; a span that has ended is an update.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Trace(_) => EventKind::TraceCreate,
            Self::Span(s) if s.ended_at.is_some() => EventKind::SpanUpdate,
            Self::Span(_) => EventKind::SpanCreate,
            Self::Event(_) => EventKind::EventCreate,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        let at = match self {
            Self::Trace(t) => t.timestamp,
            Self::Span(s) => s.started_at,
            Self::Event(e) => e.start_time,
        };
        at.unwrap_or_else(Utc::now)
    }
}

impl From<Trace> for Observation {
    fn from(t: Trace) -> Self {
        Self::Trace(t)
    }
}

impl From<Span> for Observation {
    fn from(s: Span) -> Self {
        Self::Span(s)
    }
}

impl From<Event> for Observation {
    fn from(e: Event) -> Self {
        Self::Event(e)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_span_kind_follows_end_time() {
        let mut span = Span::named("exec");
        assert_eq!(Observation::from(span.clone()).kind(), EventKind::SpanCreate);
        span.ended_at = Some(Utc::now());
        assert_eq!(Observation::from(span).kind(), EventKind::SpanUpdate);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(EventKind::EventCreate).unwrap(), json!("event-create"));
        assert_eq!(serde_json::to_value(Level::Error).unwrap(), json!("ERROR"));

        let event = Event {
            id: "e1".to_string(),
            trace_id: "t1".to_string(),
            parent_observation_id: "s1".to_string(),
            ..Event::named("stream")
        };
        let body = serde_json::to_value(Observation::from(event)).unwrap();
        assert_eq!(body["traceId"], "t1");
        assert_eq!(body["parentObservationId"], "s1");
        assert_eq!(body["level"], "DEFAULT");
        assert!(body.get("statusMessage").is_none());
    }
}
