// Worker loop: drains the job queue and commits analysis outcomes

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Delivery, JobQueue};
use crate::analysis::AnalysisExecutor;
use crate::db::{IntegrityError, JobStore, StoreError};
use crate::models::{Job, JobId, JobStatus};
use crate::utils::retry::{with_retry, RetryPolicy};

/// Pause after a queue error before polling again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const MIN_LEASE: Duration = Duration::from_millis(30);

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Payload could not be decoded; dropped.
    Malformed,
    /// No job with this id; dropped.
    Missing(JobId),
    /// Job was already terminal before any work was done.
    AlreadyTerminal(JobStatus),
    /// The executor ran and its outcome was committed.
    Committed(JobStatus),
    /// The final update was refused by the store.
    Rejected(IntegrityError),
    /// The store kept failing; the delivery went back on the queue.
    Requeued,
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    executor: Arc<AnalysisExecutor>,
    poll_interval: Duration,
    retry: RetryPolicy,
    consumer: String,
    lease: Duration,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        executor: Arc<AnalysisExecutor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            executor,
            poll_interval,
            retry: RetryPolicy::default(),
            consumer: format!("worker-{}", Uuid::new_v4()),
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Lease kept alive on claimed deliveries while this worker runs.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease.max(MIN_LEASE);
        self
    }

    /// Queue identity of this worker.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Run until `shutdown` is cancelled. A job already being processed is
    /// finished before the loop returns, and anything still claimed is
    /// handed back to the queue.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(queue = self.queue.name(), consumer = %self.consumer, "Worker started");

        if let Err(e) = self.queue.heartbeat(&self.consumer, self.lease).await {
            warn!(error = %e, "Failed to register worker lease");
        }
        let stop_heartbeat = shutdown.child_token();
        let heartbeat = tokio::spawn(keep_alive(
            self.queue.clone(),
            self.consumer.clone(),
            self.lease,
            stop_heartbeat.clone(),
        ));

        self.recover_lapsed().await;
        let mut last_recovery = Instant::now();

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.queue.dequeue(&self.consumer, self.poll_interval) => next,
            };

            match delivery {
                Ok(Some(delivery)) => {
                    let outcome = self.process_delivery(delivery).await;
                    debug!(?outcome, "Delivery processed");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }

            if last_recovery.elapsed() >= self.lease {
                self.recover_lapsed().await;
                last_recovery = Instant::now();
            }
        }

        stop_heartbeat.cancel();
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "Heartbeat task failed");
        }
        match self.queue.retire(&self.consumer).await {
            Ok(0) => {}
            Ok(n) => info!(released = n, "Returned claimed deliveries to the queue"),
            Err(e) => warn!(error = %e, "Failed to release claimed deliveries"),
        }

        info!(queue = self.queue.name(), consumer = %self.consumer, "Worker stopped");
    }

    /// Put back deliveries held by workers whose lease ran out.
    async fn recover_lapsed(&self) {
        match self.queue.recover().await {
            Ok(0) => {}
            Ok(n) => info!(recovered = n, "Requeued deliveries from lapsed workers"),
            Err(e) => warn!(error = %e, "Failed to recover in-flight deliveries"),
        }
    }

    /// Handle one delivery end to end, including its ack or requeue.
    pub async fn process_delivery(&self, delivery: Delivery) -> ProcessOutcome {
        let message = match delivery.decode() {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Dropping malformed queue payload");
                self.ack(&delivery).await;
                return ProcessOutcome::Malformed;
            }
        };
        let job_id = message.job_id;

        let job = match self.load(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Queued job not found; dropping delivery");
                self.ack(&delivery).await;
                return ProcessOutcome::Missing(job_id);
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Could not load job; requeueing");
                return self.requeue(&delivery).await;
            }
        };

        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Duplicate delivery for finished job");
            self.ack(&delivery).await;
            return ProcessOutcome::AlreadyTerminal(job.status);
        }

        info!(job_id = %job_id, "Running analysis");
        let (status, result) = self
            .executor
            .execute(&job.query, &job.input_reference)
            .await
            .into_parts();

        match self.commit(job_id, status, result).await {
            Ok(job) => {
                info!(job_id = %job_id, status = %job.status, "Analysis committed");
                self.ack(&delivery).await;
                ProcessOutcome::Committed(job.status)
            }
            Err(StoreError::Integrity(rejection)) => {
                match &rejection {
                    IntegrityError::AlreadyTerminal { status, .. } => {
                        info!(job_id = %job_id, %status, "Job finished elsewhere; keeping stored result")
                    }
                    other => warn!(job_id = %job_id, error = %other, "Store refused analysis result"),
                }
                self.ack(&delivery).await;
                ProcessOutcome::Rejected(rejection)
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Could not commit analysis; requeueing");
                self.requeue(&delivery).await
            }
        }
    }

    async fn load(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let store = &self.store;
        with_retry(self.retry, StoreError::is_transient, move || async move {
            store.get(id).await
        })
        .await
    }

    async fn commit(
        &self,
        id: JobId,
        status: JobStatus,
        result: String,
    ) -> Result<Job, StoreError> {
        let store = &self.store;
        let result = &result;
        with_retry(self.retry, StoreError::is_transient, move || async move {
            store.update(id, status, Some(result.clone())).await
        })
        .await
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            warn!(error = %e, "Failed to acknowledge delivery");
        }
    }

    async fn requeue(&self, delivery: &Delivery) -> ProcessOutcome {
        if let Err(e) = self.queue.requeue(delivery).await {
            // The entry stays in the processing list and comes back on recover.
            error!(error = %e, "Failed to requeue delivery");
        }
        ProcessOutcome::Requeued
    }
}

/// Refresh `consumer`'s lease every third of its length until stopped.
async fn keep_alive(
    queue: Arc<dyn JobQueue>,
    consumer: String,
    lease: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(lease / 3);
    // The first tick fires at once; the lease was just registered.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.heartbeat(&consumer, lease).await {
                    warn!(%consumer, error = %e, "Lease heartbeat failed");
                }
            }
        }
    }
}
