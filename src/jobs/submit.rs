use std::sync::Arc;

use tracing::{error, info, warn};

use crate::analysis::AnalysisExecutor;
use crate::db::{IntegrityError, JobStore, StoreError};
use crate::dispatch::{DispatchError, DispatchMode, DispatchPolicy};
use crate::models::{Job, JobStatus};
use crate::utils::retry::{with_retry, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates jobs and drives them to `queued` or a terminal state according to
/// the dispatch mode.
pub struct JobService {
    store: Arc<dyn JobStore>,
    executor: Arc<AnalysisExecutor>,
    policy: Arc<DispatchPolicy>,
    retry: RetryPolicy,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<AnalysisExecutor>,
        policy: Arc<DispatchPolicy>,
    ) -> Self {
        Self {
            store,
            executor,
            policy,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.policy.decide()
    }

    /// Record a job for an already-stored upload and dispatch it.
    ///
    /// Inline mode returns the terminal job. Queued mode returns the job as
    /// `queued`, or `failed` when the enqueue itself failed.
    pub async fn submit(&self, query: &str, input_reference: &str) -> Result<Job, SubmitError> {
        let job = self.store.create(query, input_reference).await?;
        info!(job_id = %job.id, mode = self.mode().as_str(), "Job created");

        let Some(queue) = self.policy.queue() else {
            let (status, result) = self
                .executor
                .execute(&job.query, &job.input_reference)
                .await
                .into_parts();
            return self.settle(&job, status, Some(result)).await;
        };

        if let Err(e) = queue.enqueue(job.id).await {
            let failure = DispatchError::QueueUnavailable(e);
            error!(job_id = %job.id, error = ?failure, "Failed to enqueue job");
            return self
                .settle(&job, JobStatus::Failed, Some(failure.to_string()))
                .await;
        }

        // A fast worker may already have finished the job, in which case
        // `settle` hands back the committed terminal state.
        self.settle(&job, JobStatus::Queued, None).await
    }

    async fn settle(
        &self,
        job: &Job,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<Job, SubmitError> {
        let store = &self.store;
        let result = &result;
        let id = job.id;
        let updated = with_retry(self.retry, StoreError::is_transient, move || async move {
            store.update(id, status, result.clone()).await
        })
        .await;

        match updated {
            Ok(updated) => {
                info!(job_id = %updated.id, status = %updated.status, "Job dispatched");
                Ok(updated)
            }
            Err(StoreError::Integrity(IntegrityError::AlreadyTerminal { id, status: stored })) => {
                warn!(job_id = %id, %stored, attempted = %status, "Job already finished; returning stored state");
                let current = self
                    .store
                    .get(id)
                    .await?
                    .ok_or(IntegrityError::NotFound(id))
                    .map_err(StoreError::from)?;
                Ok(current)
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record job state");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{InferenceEngine, TextExtractor};
    use crate::db::MemoryJobStore;
    use crate::queue::{JobQueue, MemoryQueue};
    use crate::models::JobId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Echo;

    impl TextExtractor for Echo {
        fn extract_text(&self, input_reference: &str) -> String {
            input_reference.to_string()
        }
    }

    struct Fixed(Result<&'static str, &'static str>);

    #[async_trait]
    impl InferenceEngine for Fixed {
        async fn analyze(&self, _query: &str, _text: &str) -> anyhow::Result<String> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => Err(anyhow::anyhow!(msg)),
            }
        }
    }

    fn executor(reply: Result<&'static str, &'static str>) -> Arc<AnalysisExecutor> {
        Arc::new(AnalysisExecutor::new(
            Arc::new(Echo),
            Arc::new(Fixed(reply)),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_inline_submission_completes() {
        let store = MemoryJobStore::new();
        let service = JobService::new(
            Arc::new(store.clone()),
            executor(Ok("3 pages, no anomalies")),
            Arc::new(DispatchPolicy::inline()),
        );

        let job = service.submit("summarize", "doc1").await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("3 pages, no anomalies"));
        assert_eq!(store.get(job.id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_inline_failure_is_recorded() {
        let store = MemoryJobStore::new();
        let service = JobService::new(
            Arc::new(store.clone()),
            executor(Err("model overloaded")),
            Arc::new(DispatchPolicy::inline()),
        );

        let job = service.submit("summarize", "doc1").await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result.as_deref(), Some("analysis error: model overloaded"));
    }

    #[tokio::test]
    async fn test_queued_submission_returns_immediately() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(MemoryQueue::new());
        let service = JobService::new(
            Arc::new(store.clone()),
            executor(Ok("unused")),
            Arc::new(DispatchPolicy::queued(queue.clone())),
        );

        let job = service.submit("summarize", "doc1").await.unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert_eq!(queue.pending_len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_failure_fails_job() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(MemoryQueue::new());
        let service = JobService::new(
            Arc::new(store.clone()),
            executor(Ok("unused")),
            Arc::new(DispatchPolicy::queued(queue.clone())),
        );
        queue.set_available(false);

        let job = service.submit("summarize", "doc1").await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result.as_deref(), Some("dispatch failure: queue unavailable"));
    }

    /// Worker finishing the job between enqueue and the `queued` write.
    struct EagerQueue {
        store: MemoryJobStore,
    }

    #[async_trait]
    impl JobQueue for EagerQueue {
        async fn probe(&self) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }

        async fn enqueue(&self, job_id: crate::models::JobId) -> Result<(), crate::queue::QueueError> {
            self.store
                .update(job_id, JobStatus::Completed, Some("done early".to_string()))
                .await
                .unwrap();
            Ok(())
        }

        async fn dequeue(
            &self,
            _consumer: &str,
            _wait: Duration,
        ) -> Result<Option<crate::queue::Delivery>, crate::queue::QueueError> {
            Ok(None)
        }

        async fn heartbeat(&self, _consumer: &str, _lease: Duration) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }

        async fn ack(&self, _delivery: &crate::queue::Delivery) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }

        async fn requeue(&self, _delivery: &crate::queue::Delivery) -> Result<(), crate::queue::QueueError> {
            Ok(())
        }

        async fn recover(&self) -> Result<usize, crate::queue::QueueError> {
            Ok(0)
        }

        async fn retire(&self, _consumer: &str) -> Result<usize, crate::queue::QueueError> {
            Ok(0)
        }

        fn name(&self) -> &str {
            "eager"
        }
    }

    #[tokio::test]
    async fn test_worker_winning_the_race_is_reported() {
        let store = MemoryJobStore::new();
        let queue = Arc::new(EagerQueue {
            store: store.clone(),
        });
        let service = JobService::new(
            Arc::new(store.clone()),
            executor(Ok("unused")),
            Arc::new(DispatchPolicy::queued(queue)),
        );

        let job = service.submit("summarize", "doc1").await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("done early"));
    }

    /// Store whose first update hits a pool timeout.
    #[derive(Clone)]
    struct FlakyOnce {
        inner: MemoryJobStore,
        failed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl JobStore for FlakyOnce {
        async fn create(&self, query: &str, input_reference: &str) -> Result<Job, StoreError> {
            self.inner.create(query, input_reference).await
        }

        async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
            self.inner.get(id).await
        }

        async fn update(
            &self,
            id: JobId,
            status: JobStatus,
            result: Option<String>,
        ) -> Result<Job, StoreError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.update(id, status, result).await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_inline_result_survives_transient_store_error() {
        let store = MemoryJobStore::new();
        let flaky = FlakyOnce {
            inner: store.clone(),
            failed: Arc::new(AtomicBool::new(false)),
        };
        let service = JobService::new(
            Arc::new(flaky.clone()),
            executor(Ok("3 pages, no anomalies")),
            Arc::new(DispatchPolicy::inline()),
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        });

        let job = service.submit("summarize", "doc1").await.unwrap();

        assert!(flaky.failed.load(Ordering::SeqCst));
        assert_eq!(job.status, JobStatus::Completed);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.result.as_deref(), Some("3 pages, no anomalies"));
    }
}
