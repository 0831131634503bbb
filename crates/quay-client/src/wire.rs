//! Shared outbound path: route registration + write queue.
//!
//! `Wire` is the small clone-able bundle both the connection and its
//! subscription sessions hold: the routing table, the sender side of the
//! FIFO write queue, and the unwatch timeout. The write queue is drained by
//! a single writer task in strict enqueue order, so two concurrent callers
//! can never interleave partial writes. Enqueueing is synchronous — opening
//! a watch never suspends; only waiting for a reply does.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use quay_core::SyncError;
use quay_wire::Request;

use crate::routes::RouteTable;

#[derive(Clone)]
pub(crate) struct Wire {
    pub(crate) routes: RouteTable,
    write_tx: mpsc::UnboundedSender<String>,
    pub(crate) unwatch_timeout: Duration,
}

impl Wire {
    pub(crate) fn new(
        routes: RouteTable,
        write_tx: mpsc::UnboundedSender<String>,
        unwatch_timeout: Duration,
    ) -> Self {
        Self {
            routes,
            write_tx,
            unwatch_timeout,
        }
    }

    /// A wire with no connection behind it; every enqueue fails with
    /// [`SyncError::Closed`]. Backs detached sessions.
    pub(crate) fn detached() -> Self {
        let (write_tx, _) = mpsc::unbounded_channel();
        Self {
            routes: RouteTable::new(),
            write_tx,
            unwatch_timeout: Duration::from_secs(1),
        }
    }

    /// Queue one request for the writer task, in FIFO order.
    pub(crate) fn enqueue(&self, request: &Request) -> Result<(), SyncError> {
        let json = request.to_json()?;
        self.write_tx.send(json).map_err(|_| SyncError::Closed)
    }

    /// One-shot request/response: register the id, enqueue the bytes, and
    /// suspend until the correlated envelope arrives or the connection dies.
    pub(crate) async fn send(&self, request: Request) -> Result<Value, SyncError> {
        let (tx, rx) = oneshot::channel();
        // Registration precedes the write so a fast reply cannot race an
        // unregistered id.
        self.routes.insert_one_shot(request.id.as_str(), tx);
        if let Err(e) = self.enqueue(&request) {
            let _ = self.routes.remove(request.id.as_str());
            return Err(e);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_core::ModelKind;

    #[test]
    fn detached_wire_rejects_enqueue() {
        let wire = Wire::detached();
        let request = Request::watch_model(ModelKind::Vendor, "V1");
        let err = wire.enqueue(&request).unwrap_err();
        assert_eq!(err, SyncError::Closed);
    }

    #[tokio::test]
    async fn send_cleans_up_registration_on_enqueue_failure() {
        let wire = Wire::detached();
        let request = Request::watch_model(ModelKind::Vendor, "V1");
        let id = request.id.clone();
        let err = wire.send(request).await.unwrap_err();
        assert_eq!(err, SyncError::Closed);
        assert!(wire.routes.remove(id.as_str()).is_none());
    }

    #[tokio::test]
    async fn send_registers_before_write() {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel();
        let wire = Wire::new(RouteTable::new(), write_tx, Duration::from_secs(1));
        let request = Request::watch_model(ModelKind::Product, "P1");
        let id = request.id.clone();

        let routes = wire.routes.clone();
        let send = tokio::spawn(async move { wire.send(request).await });

        // By the time the bytes reach the queue, the id must be registered.
        let line = write_rx.recv().await.unwrap();
        assert!(line.contains(id.as_str()));
        let slot = routes.take_one_shot(id.as_str()).expect("registered");
        let _ = slot.send(Ok(Value::Null));
        assert_eq!(send.await.unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn writes_drain_in_enqueue_order() {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel();
        let wire = Wire::new(RouteTable::new(), write_tx, Duration::from_secs(1));
        let mut ids = Vec::new();
        for _ in 0..5 {
            let request = Request::watch_model(ModelKind::Order, "O1");
            ids.push(request.id.clone());
            wire.enqueue(&request).unwrap();
        }
        for id in &ids {
            let line = write_rx.try_recv().unwrap();
            assert!(line.contains(id.as_str()), "FIFO order violated");
        }
    }
}
