//! Queue Adapter and Worker Loop.
//!
//! Delivery is at-least-once: a job id can come back after a crash or a
//! requeue, so consumers check the job record before doing any work.

pub mod jobs;
pub mod memory;
pub mod redis_queue;
pub mod workers;

use std::time::Duration;

use async_trait::async_trait;

use crate::models::JobId;

pub use jobs::{Delivery, QueuedJob};
pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;
pub use workers::{ProcessOutcome, Worker};

/// Reliable queue of job ids.
///
/// Each consumer holds its dequeued entries in its own in-flight set and
/// keeps a lease on them alive with [`JobQueue::heartbeat`]. Only entries of
/// consumers whose lease has lapsed are handed back by [`JobQueue::recover`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Capability check used once at startup.
    async fn probe(&self) -> Result<(), QueueError>;

    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next delivery and claim it for `consumer`.
    async fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Register `consumer` and extend its lease to `lease` from now.
    async fn heartbeat(&self, consumer: &str, lease: Duration) -> Result<(), QueueError>;

    /// Drop a delivery for good once its job has been reconciled.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Hand a delivery back for a later attempt.
    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return deliveries claimed by consumers whose lease has lapsed. Returns
    /// how many were recovered.
    async fn recover(&self) -> Result<usize, QueueError>;

    /// Give back everything `consumer` still holds and drop its lease.
    async fn retire(&self, consumer: &str) -> Result<usize, QueueError>;

    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed queue payload: {0}")]
    Malformed(#[from] serde_json::Error),
}
