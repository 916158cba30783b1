//! Submission and status services shared by the HTTP layer.

pub mod status;
pub mod submit;

pub use status::{QueryError, StatusQueryService};
pub use submit::{JobService, SubmitError};

/// Query used when the client sends none, or only whitespace.
pub const DEFAULT_QUERY: &str = "Analyze this financial document for investment insights";

/// A rejected submission. No job is created for any of these.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("file is required")]
    MissingFile,

    #[error("uploaded file is empty")]
    EmptyFile,

    #[error("invalid multipart body: {0}")]
    Multipart(String),

    #[error("upload exceeds the size limit")]
    TooLarge,
}

pub fn normalize_query(query: Option<&str>) -> String {
    match query.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => DEFAULT_QUERY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query(None), DEFAULT_QUERY);
        assert_eq!(normalize_query(Some("   ")), DEFAULT_QUERY);
        assert_eq!(normalize_query(Some("  summarize \n")), "summarize");
    }
}
