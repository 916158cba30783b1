use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{check_result_shape, check_transition, IntegrityError, JobStore, StoreError};
use crate::models::{Job, JobId, JobStatus};

/// Column list for `analysis_jobs` queries.
const COLUMNS: &str = "id, query, input_reference, status, result, created_at, updated_at";

/// Postgres-backed job store over the `analysis_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    query: String,
    input_reference: String,
    status: String,
    result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row.status.parse().map_err(|e: crate::models::UnknownStatus| {
            StoreError::Corrupt {
                id: row.id,
                reason: e.to_string(),
            }
        })?;

        Ok(Job {
            id: row.id,
            query: row.query,
            input_reference: row.input_reference,
            status,
            result: row.result,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Work out why a guarded update touched no row.
    async fn rejection(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<&str>,
    ) -> StoreError {
        match self.get(id).await {
            Ok(None) => IntegrityError::NotFound(id).into(),
            Ok(Some(current)) => match check_transition(&current, status, result) {
                Err(e) => e.into(),
                // The row moved between the update and this read.
                Ok(()) => IntegrityError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                }
                .into(),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, query: &str, input_reference: &str) -> Result<Job, StoreError> {
        let sql = format!(
            "INSERT INTO analysis_jobs (id, query, input_reference, status) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(query)
            .bind(input_reference)
            .bind(JobStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM analysis_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn update(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<Job, StoreError> {
        check_result_shape(id, status, result.as_deref())?;

        let allowed_from: Vec<String> = status
            .allowed_predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        if allowed_from.is_empty() {
            return Err(self.rejection(id, status, result.as_deref()).await);
        }

        // Single guarded statement: the row only changes if it is still in a
        // state that may precede `status`.
        let sql = format!(
            "UPDATE analysis_jobs \
             SET status = $2, result = $3, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($4) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(result.as_deref())
            .bind(&allowed_from)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.rejection(id, status, result.as_deref()).await),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        super::pool::health_check(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
