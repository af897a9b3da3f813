//! Local-directory output store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, OutputStore};

/// Copies outputs into a directory and addresses them under a base URL
/// (for example a static file server in front of that directory).
#[derive(Debug, Clone)]
pub struct LocalOutputStore {
    root: PathBuf,
    base_url: String,
}

impl LocalOutputStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `LOCAL_OUTPUT_DIR` (default `./outputs`) and `LOCAL_PUBLIC_BASE_URL`
    /// (default `file://` + the directory).
    pub fn from_env() -> Self {
        let root = std::env::var("LOCAL_OUTPUT_DIR").unwrap_or_else(|_| "./outputs".to_string());
        let base_url = std::env::var("LOCAL_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("file://{}", root));
        Self::new(root, base_url)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl OutputStore for LocalOutputStore {
    async fn store(&self, local_path: &Path, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        if !tokio::fs::try_exists(local_path).await? {
            return Err(StorageError::SourceMissing(local_path.display().to_string()));
        }

        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(local_path, &dest).await?;

        info!(key, bytes, dest = %dest.display(), "Stored output locally");
        Ok(format!("{}/{}", self.base_url, key))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
