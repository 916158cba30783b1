//! Job Store: the durable record of analysis jobs.
//!
//! Every mutation goes through [`JobStore::update`], which applies a status
//! transition and its result together or not at all. Terminal jobs are never
//! written again.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::models::{Job, JobId, JobStatus};

pub use memory::*;
pub use operations::*;
pub use pool::*;

pub mod memory;
pub mod operations;
pub mod pool;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new `pending` job.
    async fn create(&self, query: &str, input_reference: &str) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Apply one status transition. `result` must be present exactly when
    /// `status` is terminal.
    async fn update(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<Job, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Short backend name for health reporting.
    fn backend(&self) -> &'static str;
}

/// A mutation that would break the job lifecycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntegrityError {
    #[error("job {0} does not exist")]
    NotFound(JobId),

    #[error("job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id} cannot be {status} with this result (has_result: {has_result})")]
    ResultMismatch {
        id: JobId,
        status: JobStatus,
        has_result: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Validate a transition of `job` to `to` with the given result.
pub fn check_transition(
    job: &Job,
    to: JobStatus,
    result: Option<&str>,
) -> Result<(), IntegrityError> {
    check_result_shape(job.id, to, result)?;

    if job.status.is_terminal() {
        return Err(IntegrityError::AlreadyTerminal {
            id: job.id,
            status: job.status,
        });
    }
    if !job.status.can_transition_to(to) {
        return Err(IntegrityError::InvalidTransition {
            id: job.id,
            from: job.status,
            to,
        });
    }
    Ok(())
}

/// Terminal states carry a non-empty result, non-terminal states carry none.
pub fn check_result_shape(
    id: JobId,
    status: JobStatus,
    result: Option<&str>,
) -> Result<(), IntegrityError> {
    let has_result = result.is_some_and(|text| !text.trim().is_empty());
    let shape_ok = if status.is_terminal() {
        has_result
    } else {
        result.is_none()
    };

    if shape_ok {
        Ok(())
    } else {
        Err(IntegrityError::ResultMismatch {
            id,
            status,
            has_result: result.is_some(),
        })
    }
}

pub async fn create_pool(config: &DatabaseConfig, url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(url)
        .await?;

    // Test connection
    health_check(&pool).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_transition_rejects_terminal() {
        let mut job = Job::new("q", "doc");
        job.status = JobStatus::Completed;
        job.result = Some("done".to_string());

        let err = check_transition(&job, JobStatus::Failed, Some("late")).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::AlreadyTerminal {
                id: job.id,
                status: JobStatus::Completed
            }
        );
    }

    #[test]
    fn test_check_transition_rejects_requeue() {
        let mut job = Job::new("q", "doc");
        job.status = JobStatus::Queued;

        let err = check_transition(&job, JobStatus::Queued, None).unwrap_err();
        assert!(matches!(err, IntegrityError::InvalidTransition { .. }));

        let err = check_transition(&job, JobStatus::Pending, None).unwrap_err();
        assert!(matches!(err, IntegrityError::InvalidTransition { .. }));
    }

    #[test]
    fn test_result_shape() {
        let id = uuid::Uuid::new_v4();
        assert!(check_result_shape(id, JobStatus::Queued, None).is_ok());
        assert!(check_result_shape(id, JobStatus::Queued, Some("x")).is_err());
        assert!(check_result_shape(id, JobStatus::Completed, Some("report")).is_ok());
        assert!(check_result_shape(id, JobStatus::Completed, None).is_err());
        assert!(check_result_shape(id, JobStatus::Failed, Some("   ")).is_err());
    }
}
