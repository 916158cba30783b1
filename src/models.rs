use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::AnalysisExecutor;
use crate::config::Config;
use crate::db::JobStore;
use crate::dispatch::DispatchPolicy;
use crate::jobs::{JobService, StatusQueryService};
use crate::storage::UploadStorage;

pub type JobId = Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jobs: Arc<JobService>,
    pub status: Arc<StatusQueryService>,
    pub storage: UploadStorage,
    pub store: Arc<dyn JobStore>,
    pub policy: Arc<DispatchPolicy>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        executor: Arc<AnalysisExecutor>,
        policy: Arc<DispatchPolicy>,
    ) -> Self {
        let jobs = Arc::new(JobService::new(store.clone(), executor, policy.clone()));
        let status = Arc::new(StatusQueryService::new(store.clone()));
        let storage = UploadStorage::new(config.storage.upload_dir.clone());

        Self {
            config,
            jobs,
            status,
            storage,
            store,
            policy,
        }
    }
}

/// Lifecycle state of an analysis job.
///
/// `Pending` is initial, `Queued` is only reached in queued dispatch mode,
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// States a job may move into `self` from.
    pub fn allowed_predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Queued => &[JobStatus::Pending],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Pending, JobStatus::Queued],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One submitted analysis request and its tracked outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub query: String,
    pub input_reference: String,
    pub status: JobStatus,
    /// Analysis text when completed, failure description when failed.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(query: impl Into<String>, input_reference: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            input_reference: input_reference.into(),
            status: JobStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// API Request/Response types

/// Body of `POST /analyze`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub status: JobStatus,
    pub job_id: JobId,
    pub query: String,
    pub file_processed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl AnalyzeResponse {
    pub fn from_job(job: &Job, file_processed: impl Into<String>) -> Self {
        Self {
            status: job.status,
            job_id: job.id,
            query: job.query.clone(),
            file_processed: file_processed.into(),
            result: job.result.clone(),
        }
    }
}

/// Body of `GET /status/{job_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<String>,
}

impl From<Job> for StatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
    pub queue: Option<String>,
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_terminal_states_never_move() {
        let all = [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Completed,
            JobStatus::Failed,
        ];
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            for next in all {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_pending_without_result() {
        let job = Job::new("summarize", "doc1");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_analyze_response_omits_missing_result() {
        let job = Job::new("summarize", "doc1");
        let json = serde_json::to_value(AnalyzeResponse::from_job(&job, "report.pdf")).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["file_processed"], "report.pdf");
        assert!(json.get("result").is_none());
    }
}
