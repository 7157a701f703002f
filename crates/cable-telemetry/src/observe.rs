//! Session feed observer.

use std::sync::Arc;

use cable_core::{OutputRecord, RecordError};
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::{
    TelemetryClient,
    events::{Event, Level, Trace},
};

/// Record every output of a session as an event on one trace.
///
/// The trace is queued immediately; the task ends with the feed. Flushing is
/// left to the caller.
pub fn observe<S>(client: Arc<TelemetryClient>, session_id: &str, feed: S) -> JoinHandle<()>
where
    S: Stream<Item = OutputRecord> + Send + Unpin + 'static,
{
    let trace = client.trace(Trace {
        session_id: session_id.to_string(),
        ..Trace::named("kernel-session")
    });

    tokio::spawn(async move {
        let mut feed = feed;
        let mut seen = 0usize;
        while let Some(record) = feed.next().await {
            if let Err(e) = client.event(to_event(&trace.id, &record)) {
                tracing::warn!("Dropping telemetry for record: {e}");
                continue;
            }
            seen += 1;
        }
        tracing::debug!("Observed {seen} records on trace {}", trace.id);
    })
}

fn to_event(trace_id: &str, record: &OutputRecord) -> Event {
    let (name, level, status_message) = match &record.error {
        Some(RecordError::Kernel(err)) => ("error", Level::Error, err.to_string()),
        Some(RecordError::Fault { message }) => ("fault", Level::Error, message.clone()),
        None if !record.status.is_empty() => ("reply", Level::Default, record.status.clone()),
        None if record.data.is_some() => ("display", Level::Default, String::new()),
        None => ("stream", Level::Default, String::new()),
    };
    Event {
        trace_id: trace_id.to_string(),
        start_time: record.timestamp,
        output: serde_json::to_value(record).ok(),
        metadata: record.owner.map(|id| json!({ "execution": id })),
        level,
        status_message,
        ..Event::named(name)
    }
}

#[cfg(test)]
mod tests {
    use cable_core::{KernelError, OutputFeed};

    use super::*;
    use crate::TelemetryOptions;

    #[tokio::test]
    async fn test_feed_records_become_events() {
        let client = Arc::new(
            TelemetryClient::new(TelemetryOptions {
                public_key: "pk".to_string(),
                secret_key: "sk".to_string(),
                ..TelemetryOptions::default()
            })
            .unwrap(),
        );
        let feed = OutputFeed::new();
        feed.push(OutputRecord {
            name: Some("stdout".to_string()),
            text: "42\n".to_string(),
            ..OutputRecord::default()
        });
        feed.push(OutputRecord::fault("keepalive failed"));
        feed.close();

        observe(Arc::clone(&client), "s-1", feed.history_plus_stream())
            .await
            .unwrap();
        assert_eq!(client.pending(), 3);
    }

    #[test]
    fn test_event_naming() {
        let error = OutputRecord {
            status: "error".to_string(),
            error: Some(RecordError::Kernel(KernelError {
                ename: "ZeroDivisionError".to_string(),
                evalue: "division by zero".to_string(),
                traceback: Vec::new(),
            })),
            ..OutputRecord::default()
        };
        let event = to_event("t", &error);
        assert_eq!(event.name, "error");
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.status_message, "ZeroDivisionError: division by zero");

        let reply = OutputRecord {
            status: "ok".to_string(),
            ..OutputRecord::default()
        };
        assert_eq!(to_event("t", &reply).name, "reply");
        assert_eq!(to_event("t", &OutputRecord::default()).name, "stream");
    }
}
