// Queue payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueueError;
use crate::models::JobId;

/// What travels through the broker: only the job id, everything else is read
/// back from the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One dequeued message. The raw payload and the claiming consumer are kept
/// so the exact entry can be acknowledged or requeued.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub payload: String,
    pub consumer: String,
}

impl Delivery {
    pub fn new(payload: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            consumer: consumer.into(),
        }
    }

    pub fn decode(&self) -> Result<QueuedJob, QueueError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_decodes_payload() {
        let job = QueuedJob::new(uuid::Uuid::new_v4());
        let delivery = Delivery::new(job.encode().unwrap(), "worker-1");
        assert_eq!(delivery.decode().unwrap(), job);
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let delivery = Delivery::new("not json", "worker-1");
        assert!(matches!(delivery.decode(), Err(QueueError::Malformed(_))));
    }
}
