//! Broadcast + history feed of published output records.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::OutputRecord;

/// Number of records retained for late listeners.
const HISTORY_RECORDS: usize = 1024;

/// Live channel capacity before slow listeners start lagging.
const CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    history: VecDeque<OutputRecord>,
    sender: Option<broadcast::Sender<OutputRecord>>,
}

/// Raw, unfiltered feed of every record a session publishes.
///
/// Listeners that join late receive the retained history first, then live
/// records. Closing the feed ends every listener's stream.
pub struct OutputFeed {
    inner: RwLock<Inner>,
}

impl Default for OutputFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFeed {
    /// Create an open feed.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                sender: Some(sender),
            }),
        }
    }

    /// Publish a record to live listeners and history.
    ///
    /// Returns `false` if the feed is closed.
    pub fn push(&self, record: OutputRecord) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = &inner.sender else {
            return false;
        };
        let _ = sender.send(record.clone()); // live listeners

        if inner.history.len() == HISTORY_RECORDS {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
        true
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<OutputRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live records until close.
    #[must_use]
    pub fn history_plus_stream(&self) -> BoxStream<'static, OutputRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let history: Vec<_> = inner.history.iter().cloned().collect();
        let hist = futures::stream::iter(history);

        let Some(sender) = &inner.sender else {
            return hist.boxed();
        };
        let live = BroadcastStream::new(sender.subscribe()).filter_map(|res| async move {
            match res {
                Ok(record) => Some(record),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!("Output listener lagged, skipped {skipped} records");
                    None
                }
            }
        });

        hist.chain(live).boxed()
    }

    /// Close the feed. Idempotent.
    pub fn close(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .take();
    }

    /// Whether the feed has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .is_none()
    }
}
