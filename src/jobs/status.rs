use std::sync::Arc;

use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::Job;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-only view of jobs.
pub struct StatusQueryService {
    store: Arc<dyn JobStore>,
}

impl StatusQueryService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Look a job up by its external id. Ids that are not UUIDs are simply
    /// unknown.
    pub async fn query(&self, id: &str) -> Result<Job, QueryError> {
        let Ok(uuid) = Uuid::parse_str(id.trim()) else {
            return Err(QueryError::NotFound(id.to_string()));
        };

        self.store
            .get(uuid)
            .await?
            .ok_or_else(|| QueryError::NotFound(id.to_string()))
    }
}
