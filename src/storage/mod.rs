// Local upload storage

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Writes uploaded documents under one directory. The returned path is the
/// job's input reference; files are never removed here.
#[derive(Debug, Clone)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save_upload(&self, data: &[u8]) -> std::io::Result<String> {
        fs::create_dir_all(&self.root).await?;

        let path = self
            .root
            .join(format!("financial_document_{}.pdf", Uuid::new_v4()));
        fs::write(&path, data).await?;

        debug!(path = %path.display(), bytes = data.len(), "Upload stored");
        Ok(path.to_string_lossy().into_owned())
    }
}
