//! Batching Worker Pool
//!
//! A pool of workers draining the shared queue. Each worker owns a local
//! batch buffer and a flush timer; a batch is flushed when it reaches the
//! size bound or when the timer fires, whichever comes first. On shutdown a
//! worker drains its current batch with one standard flush before exiting.
//!
//! A flush writes to the relational store and then to the cache, each under
//! its own retry policy. Failure of one sink never aborts the other; a batch
//! whose retries are exhausted on a sink is abandoned for that sink.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::queue::QueueReceiver;
use super::retry::{RetryPolicy, retry};
use crate::application::ports::BatchSink;
use crate::domain::market_data::MarketData;
use crate::infrastructure::metrics::{
    ErrorKind, record_batch_insert, record_messages_processed, record_processing_latency,
};

// =============================================================================
// Worker Pool
// =============================================================================

/// Configuration shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Records per batch before a size-based flush.
    pub batch_size: usize,
    /// Number of workers draining the queue.
    pub worker_count: usize,
    /// Interval of the flush timer. The timer is periodic and is not reset
    /// by size-based flushes.
    pub flush_interval: std::time::Duration,
}

/// The batching worker pool.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawn the configured number of workers.
    ///
    /// The returned handles complete once the workers have drained their
    /// final batches after cancellation.
    pub fn spawn<S, C>(
        config: &WorkerPoolConfig,
        queue: QueueReceiver,
        store: Arc<S>,
        cache: Arc<C>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>>
    where
        S: BatchSink + 'static,
        C: BatchSink + 'static,
    {
        (0..config.worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    batch_size: config.batch_size,
                    flush_interval: config.flush_interval,
                    queue: queue.clone(),
                    store: Arc::clone(&store),
                    cache: Arc::clone(&cache),
                    cancel: cancel.clone(),
                    retry_policy: RetryPolicy::default(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker<S, C> {
    id: usize,
    batch_size: usize,
    flush_interval: std::time::Duration,
    queue: QueueReceiver,
    store: Arc<S>,
    cache: Arc<C>,
    cancel: CancellationToken,
    retry_policy: RetryPolicy,
}

impl<S, C> Worker<S, C>
where
    S: BatchSink,
    C: BatchSink,
{
    async fn run(self) {
        let mut batch: Vec<MarketData> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    if !batch.is_empty() {
                        self.flush(&batch).await;
                    }
                    tracing::debug!(worker = self.id, "worker stopped");
                    return;
                }
                received = self.queue.recv() => {
                    match received {
                        Some(data) => {
                            batch.push(data);
                            if batch.len() >= self.batch_size {
                                self.flush(&batch).await;
                                batch.clear();
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                self.flush(&batch).await;
                            }
                            tracing::debug!(worker = self.id, "queue closed, worker stopped");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&batch).await;
                        batch.clear();
                    }
                }
            }
        }
    }

    /// Flush a batch to both sinks, each independently retried.
    async fn flush(&self, batch: &[MarketData]) {
        let start = Instant::now();

        if let Err(e) = retry(&self.retry_policy, ErrorKind::StoreInsert, || {
            self.store.insert_batch(batch)
        })
        .await
        {
            tracing::error!(
                worker = self.id,
                batch_len = batch.len(),
                error = %e,
                "store insert failed after retries, batch abandoned"
            );
        }

        if let Err(e) = retry(&self.retry_policy, ErrorKind::CacheInsert, || {
            self.cache.insert_batch(batch)
        })
        .await
        {
            tracing::error!(
                worker = self.id,
                batch_len = batch.len(),
                error = %e,
                "cache insert failed after retries, batch abandoned"
            );
        }

        record_batch_insert();
        record_messages_processed(batch.len() as u64);
        record_processing_latency(start.elapsed());
    }
}
