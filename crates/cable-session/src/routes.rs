//! Correlation-id route table consulted by the reader loop.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use cable_core::OutputRecord;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    routes: HashMap<Uuid, mpsc::UnboundedSender<OutputRecord>>,
    closed: bool,
}

/// Maps each pending execution's id to the sender feeding its stream.
#[derive(Default)]
pub struct RouteTable {
    inner: Mutex<Inner>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route for `id`.
    ///
    /// Returns `None` once the table has been closed.
    pub fn register(&self, id: Uuid) -> Option<mpsc::UnboundedReceiver<OutputRecord>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.routes.insert(id, tx);
        Some(rx)
    }

    pub fn remove(&self, id: Uuid) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .remove(&id);
    }

    /// Deliver a record to its owner's stream.
    ///
    /// A terminal record removes the route, which ends the stream. Returns
    /// `true` if the record reached a live receiver.
    pub fn dispatch(&self, record: OutputRecord) -> bool {
        let Some(owner) = record.owner else {
            return false;
        };
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let terminal = record.is_terminal();
        let Some(tx) = inner.routes.get(&owner) else {
            tracing::debug!("No route for {owner}");
            return false;
        };

        let delivered = tx.send(record).is_ok();
        if !delivered {
            tracing::warn!("Execution {owner} was dropped, pruning its route");
        }
        if terminal || !delivered {
            inner.routes.remove(&owner);
        }
        delivered
    }

    /// Drop every route and refuse new ones. Idempotent.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;
        inner.routes.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner: Uuid, text: &str) -> OutputRecord {
        OutputRecord {
            owner: Some(owner),
            text: text.to_string(),
            ..OutputRecord::default()
        }
    }

    #[test]
    fn test_dispatch_reaches_only_owner() {
        let table = RouteTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = table.register(a).unwrap();
        let mut rx_b = table.register(b).unwrap();

        assert!(table.dispatch(record(b, "for b")));
        assert!(table.dispatch(record(a, "for a")));

        assert_eq!(rx_a.try_recv().unwrap().text, "for a");
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().text, "for b");
    }

    #[test]
    fn test_terminal_record_removes_route() {
        let table = RouteTable::new();
        let id = Uuid::new_v4();
        let mut rx = table.register(id).unwrap();

        let mut reply = record(id, "");
        reply.status = "ok".to_string();
        assert!(table.dispatch(reply));
        assert_eq!(table.len(), 0);

        assert_eq!(rx.try_recv().unwrap().status, "ok");
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let table = RouteTable::new();
        let id = Uuid::new_v4();
        drop(table.register(id).unwrap());

        assert!(!table.dispatch(record(id, "late")));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_unowned_and_unknown_records_are_not_delivered() {
        let table = RouteTable::new();
        let _rx = table.register(Uuid::new_v4()).unwrap();
        assert!(!table.dispatch(OutputRecord::default()));
        assert!(!table.dispatch(record(Uuid::new_v4(), "stranger")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_close_all_ends_streams_and_refuses_new_routes() {
        let table = RouteTable::new();
        let mut rx = table.register(Uuid::new_v4()).unwrap();
        table.close_all();
        table.close_all();

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(table.register(Uuid::new_v4()).is_none());
    }
}
