//! Analysis Executor
//!
//! Runs the inference engine against a document's text and turns every way
//! it can go wrong (error, panic, hang, empty output) into an
//! [`AnalysisOutcome::Failure`] with a short, non-sensitive description.
//! Nothing the engine does escapes this boundary.

pub mod extract;
pub mod inference;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::models::JobStatus;

pub use extract::{FileTextExtractor, TextExtractor};
pub use inference::{InferenceEngine, LlmInference, StubInference};

/// Failure text recorded when the engine exceeds its time bound.
pub const TIMEOUT_DESCRIPTION: &str = "timeout";

/// Longest failure description kept on a job.
const MAX_DESCRIPTION_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Success(String),
    Failure(String),
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success(_))
    }

    /// Terminal job status this outcome commits.
    pub fn status(&self) -> JobStatus {
        match self {
            AnalysisOutcome::Success(_) => JobStatus::Completed,
            AnalysisOutcome::Failure(_) => JobStatus::Failed,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            AnalysisOutcome::Success(text) | AnalysisOutcome::Failure(text) => text,
        }
    }

    pub fn into_parts(self) -> (JobStatus, String) {
        let status = self.status();
        match self {
            AnalysisOutcome::Success(text) | AnalysisOutcome::Failure(text) => (status, text),
        }
    }

    fn analysis_error(description: &str) -> Self {
        AnalysisOutcome::Failure(format!("analysis error: {description}"))
    }
}

pub struct AnalysisExecutor {
    extractor: Arc<dyn TextExtractor>,
    engine: Arc<dyn InferenceEngine>,
    timeout: Duration,
}

impl AnalysisExecutor {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        engine: Arc<dyn InferenceEngine>,
        timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            engine,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Analyze the document at `input_reference` for `query`.
    ///
    /// Extraction and inference run in their own task so a panic is caught at
    /// the join, and the whole call is bounded by the configured timeout.
    pub async fn execute(&self, query: &str, input_reference: &str) -> AnalysisOutcome {
        let extractor = self.extractor.clone();
        let engine = self.engine.clone();
        let query = query.to_string();
        let reference = input_reference.to_string();

        let task = tokio::spawn(async move {
            let text = tokio::task::spawn_blocking(move || extractor.extract_text(&reference))
                .await
                .unwrap_or_default();
            debug!(chars = text.len(), "Document text extracted");
            engine.analyze(&query, &text).await
        });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                abort.abort();
                warn!(timeout_secs = self.timeout.as_secs_f64(), "Analysis timed out");
                AnalysisOutcome::Failure(TIMEOUT_DESCRIPTION.to_string())
            }
            Ok(Err(join_err)) => join_failure(join_err),
            Ok(Ok(Err(err))) => {
                warn!(error = %err, "Analysis routine failed");
                AnalysisOutcome::analysis_error(&describe(&err.to_string()))
            }
            Ok(Ok(Ok(text))) if text.trim().is_empty() => {
                warn!("Analysis routine returned empty output");
                AnalysisOutcome::analysis_error("empty response from analysis routine")
            }
            Ok(Ok(Ok(text))) => AnalysisOutcome::Success(text),
        }
    }
}

fn join_failure(err: JoinError) -> AnalysisOutcome {
    if err.is_panic() {
        warn!("Analysis routine panicked");
        AnalysisOutcome::analysis_error("analysis routine terminated unexpectedly")
    } else {
        warn!("Analysis task was cancelled");
        AnalysisOutcome::analysis_error("analysis routine was cancelled")
    }
}

/// Collapse an error message to a single bounded line.
fn describe(message: &str) -> String {
    let line = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.is_empty() {
        return "unknown error".to_string();
    }
    if line.chars().count() <= MAX_DESCRIPTION_CHARS {
        return line;
    }
    let mut truncated: String = line.chars().take(MAX_DESCRIPTION_CHARS).collect();
    truncated.push_str("...");
    truncated
}
