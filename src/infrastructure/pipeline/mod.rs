//! Batching pipeline: bounded queue, retry policy, and worker pool.

/// Bounded ingest-to-worker queue.
pub mod queue;

/// Linear sink retry policy.
pub mod retry;

/// Batching worker pool.
pub mod worker;

pub use queue::{QUEUE_CAPACITY, QueueReceiver, QueueSender, bounded};
pub use retry::RetryPolicy;
pub use worker::{WorkerPool, WorkerPoolConfig};
