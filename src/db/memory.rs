use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{check_transition, IntegrityError, JobStore, StoreError};
use crate::models::{Job, JobId, JobStatus};

/// Process-local job store.
///
/// Each mutation happens under one write lock, so status and result always
/// change together.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Snapshot of every stored job.
    pub async fn all(&self) -> Vec<Job> {
        self.inner.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, query: &str, input_reference: &str) -> Result<Job, StoreError> {
        let job = Job::new(query, input_reference);
        let mut guard = self.inner.write().await;
        guard.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.get(&id).cloned())
    }

    async fn update(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<Job, StoreError> {
        let mut guard = self.inner.write().await;
        let job = guard.get_mut(&id).ok_or(IntegrityError::NotFound(id))?;

        check_transition(job, status, result.as_deref())?;

        job.status = status;
        job.result = result;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let job = store.create("summarize", "doc1").await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
        assert!(store.get(uuid::Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = MemoryJobStore::new();
        let a = store.create("q", "doc").await.unwrap();
        let b = store.create("q", "doc").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_missing_job_is_integrity_error() {
        let store = MemoryJobStore::new();
        let id = uuid::Uuid::new_v4();
        let err = store
            .update(id, JobStatus::Completed, Some("done".into()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Integrity(IntegrityError::NotFound(missing)) if missing == id
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_terminal_job_is_never_rewritten() {
        let store = MemoryJobStore::new();
        let job = store.create("q", "doc").await.unwrap();
        let done = store
            .update(job.id, JobStatus::Completed, Some("first".into()))
            .await
            .unwrap();

        let err = store
            .update(job.id, JobStatus::Failed, Some("second".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Integrity(IntegrityError::AlreadyTerminal { .. })
        ));

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.result.as_deref(), Some("first"));
        assert_eq!(stored.updated_at, done.updated_at);
    }

    #[tokio::test]
    async fn test_queued_then_completed() {
        let store = MemoryJobStore::new();
        let job = store.create("q", "doc").await.unwrap();

        let queued = store.update(job.id, JobStatus::Queued, None).await.unwrap();
        assert_eq!(queued.status, JobStatus::Queued);
        assert!(queued.result.is_none());
        assert!(queued.updated_at >= job.updated_at);

        let done = store
            .update(job.id, JobStatus::Completed, Some("report".into()))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.created_at, job.created_at);
    }

    #[tokio::test]
    async fn test_queued_without_result_only() {
        let store = MemoryJobStore::new();
        let job = store.create("q", "doc").await.unwrap();

        let err = store
            .update(job.id, JobStatus::Queued, Some("early".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Integrity(IntegrityError::ResultMismatch { .. })
        ));
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
    }
}
