//! Per-submission output streams.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use cable_core::{OutputRecord, RecordError};
use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ExecutionError;

/// Output of one submitted snippet.
///
/// Yields only records whose parent id matches this execution's id, and ends
/// after the terminal record or when the session tears down.
#[derive(Debug)]
pub struct Execution {
    id: Uuid,
    records: mpsc::UnboundedReceiver<OutputRecord>,
}

impl Execution {
    pub(crate) const fn new(id: Uuid, records: mpsc::UnboundedReceiver<OutputRecord>) -> Self {
        Self { id, records }
    }

    /// Correlation id of the submission.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Next record, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<OutputRecord> {
        self.records.recv().await
    }

    /// Drain the stream.
    ///
    /// # Errors
    /// Returns the kernel error if the code raised, a fault if the session
    /// failed, or [`ExecutionError::Unterminated`] if the stream ended
    /// without a reply.
    pub async fn finish(mut self) -> Result<Completion, ExecutionError> {
        let mut records = Vec::new();
        while let Some(record) = self.records.recv().await {
            if !record.is_terminal() {
                records.push(record);
                continue;
            }
            return match record.error.clone() {
                Some(RecordError::Kernel(err)) => Err(ExecutionError::Kernel(err)),
                Some(RecordError::Fault { message }) => Err(ExecutionError::Fault(message)),
                None => Ok(Completion {
                    records,
                    terminal: record,
                }),
            };
        }
        Err(ExecutionError::Unterminated(self.id))
    }
}

impl Stream for Execution {
    type Item = OutputRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_recv(cx)
    }
}

/// A successfully finished execution.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Non-terminal records, in arrival order.
    pub records: Vec<OutputRecord>,
    /// The closing reply.
    pub terminal: OutputRecord,
}

impl Completion {
    #[must_use]
    pub const fn execution_count(&self) -> Option<u32> {
        self.terminal.execution_count
    }

    /// Concatenated `stdout` stream text.
    #[must_use]
    pub fn stdout(&self) -> String {
        self.records
            .iter()
            .filter(|r| r.name.as_deref() == Some("stdout"))
            .map(|r| r.text.as_str())
            .collect()
    }

    /// Concatenated display text of every record.
    #[must_use]
    pub fn text(&self) -> String {
        self.records
            .iter()
            .filter_map(OutputRecord::display_text)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use cable_core::KernelError;
    use futures::StreamExt;
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    fn stream(id: Uuid, text: &str) -> OutputRecord {
        OutputRecord {
            owner: Some(id),
            name: Some("stdout".to_string()),
            text: text.to_string(),
            ..OutputRecord::default()
        }
    }

    fn reply(id: Uuid, count: u32) -> OutputRecord {
        OutputRecord {
            owner: Some(id),
            status: "ok".to_string(),
            execution_count: Some(count),
            ..OutputRecord::default()
        }
    }

    #[tokio::test]
    async fn test_finish_collects_until_reply() {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(stream(id, "4")).unwrap();
        tx.send(stream(id, "2\n")).unwrap();
        tx.send(reply(id, 3)).unwrap();

        let done = Execution::new(id, rx).finish().await.unwrap();
        assert_eq!(done.stdout(), "42\n");
        assert_eq!(done.text(), "42\n");
        assert_eq!(done.execution_count(), Some(3));
    }

    #[tokio::test]
    async fn test_finish_maps_kernel_error() {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut failed = reply(id, 1);
        failed.status = "error".to_string();
        failed.error = Some(RecordError::Kernel(KernelError {
            ename: "NameError".to_string(),
            evalue: "name 'y' is not defined".to_string(),
            traceback: Vec::new(),
        }));
        tx.send(failed).unwrap();

        let err = Execution::new(id, rx).finish().await.unwrap_err();
        assert!(matches!(err, ExecutionError::Kernel(e) if e.ename == "NameError"));
    }

    #[tokio::test]
    async fn test_finish_without_reply_is_unterminated() {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(stream(id, "partial")).unwrap();
        drop(tx);

        let err = Execution::new(id, rx).finish().await.unwrap_err();
        assert!(matches!(err, ExecutionError::Unterminated(got) if got == id));
    }

    #[test]
    fn test_recv_waits_for_the_next_record() {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut execution = Execution::new(id, rx);

        let mut next = task::spawn(execution.recv());
        assert_pending!(next.poll());
        tx.send(stream(id, "hi")).unwrap();
        assert!(next.is_woken());
        assert_eq!(assert_ready!(next.poll()).unwrap().text, "hi");
        drop(next);

        drop(tx);
        let mut next = task::spawn(execution.recv());
        assert!(assert_ready!(next.poll()).is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_records() {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(stream(id, "a")).unwrap();
        tx.send(reply(id, 1)).unwrap();
        drop(tx);

        let records: Vec<_> = Execution::new(id, rx).collect().await;
        assert_eq!(records.len(), 2);
        assert!(records[1].is_terminal());
    }
}
