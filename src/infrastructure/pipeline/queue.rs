//! Bounded Pipeline Queue
//!
//! A single in-process queue carrying records from the ingestor to the
//! worker pool. Sends block when the queue is full; the ingestor pausing on
//! a full queue is what slows upstream reads. Nothing is ever dropped.
//!
//! The underlying channel is a tokio `mpsc` with the receiver shared behind
//! an async mutex so that multiple workers can drain one queue.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::domain::market_data::MarketData;

/// Capacity of the ingest-to-worker queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// The queue was closed because every receiver is gone.
#[derive(Debug, thiserror::Error)]
#[error("queue closed")]
pub struct QueueClosed;

/// Producer half of the queue, held by the ingestor.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<MarketData>,
}

impl QueueSender {
    /// Enqueue a record, waiting while the queue is at capacity.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if all workers have exited.
    pub async fn send(&self, data: MarketData) -> Result<(), QueueClosed> {
        self.tx.send(data).await.map_err(|_| QueueClosed)
    }
}

/// Consumer half of the queue, cloned into each worker.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<MarketData>>>,
}

impl QueueReceiver {
    /// Receive the next record, or `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<MarketData> {
        self.rx.lock().await.recv().await
    }
}

/// Create a bounded queue of the given capacity.
#[must_use]
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
