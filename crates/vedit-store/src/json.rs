//! JSON-file repositories: one `{id}.json` document per record.
//!
//! Writes go to a temporary file first and are renamed into place, so a
//! reader never observes a half-written record.

use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use vedit_models::{Project, RenderId, RenderRecord};

use crate::error::{StoreError, StoreResult};
use crate::repos::{ProjectRepository, RenderRepository};

/// Directory of JSON documents keyed by id.
#[derive(Debug)]
struct JsonDir {
    dir: PathBuf,
    kind: &'static str,
    /// Serializes create/save so existence checks and writes don't interleave
    write_lock: Mutex<()>,
}

impl JsonDir {
    async fn open(dir: impl AsRef<Path>, kind: &'static str) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), kind, "Opened JSON store");
        Ok(Self {
            dir,
            kind,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn read<T: DeserializeOwned>(&self, id: &str) -> StoreResult<Option<T>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(&self, id: &str, value: &T) -> StoreResult<()> {
        let path = self.path_for(id)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        counter!("vedit_store_writes_total", "kind" => self.kind).increment(1);
        debug!(kind = self.kind, id, "Wrote JSON document");
        Ok(())
    }

    /// Every document in the directory. Leftover temp files are ignored.
    async fn read_all<T: DeserializeOwned>(&self) -> StoreResult<Vec<T>> {
        let mut docs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            docs.push(serde_json::from_slice(&bytes)?);
        }
        Ok(docs)
    }

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(id)?).await?)
    }
}

/// Render records stored as `{dir}/{render_id}.json`.
#[derive(Debug)]
pub struct JsonRenderRepository {
    docs: JsonDir,
}

impl JsonRenderRepository {
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self {
            docs: JsonDir::open(dir, "render").await?,
        })
    }
}

#[async_trait]
impl RenderRepository for JsonRenderRepository {
    async fn create(&self, record: &RenderRecord) -> StoreResult<()> {
        let _guard = self.docs.write_lock.lock().await;
        if self.docs.exists(record.id.as_str()).await? {
            return Err(StoreError::already_exists(record.id.as_str()));
        }
        self.docs.write(record.id.as_str(), record).await
    }

    async fn get(&self, id: &RenderId) -> StoreResult<Option<RenderRecord>> {
        self.docs.read(id.as_str()).await
    }

    async fn save(&self, record: &RenderRecord) -> StoreResult<()> {
        let _guard = self.docs.write_lock.lock().await;
        if !self.docs.exists(record.id.as_str()).await? {
            return Err(StoreError::not_found(record.id.as_str()));
        }
        self.docs.write(record.id.as_str(), record).await
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<RenderRecord>> {
        let mut unfinished: Vec<RenderRecord> = self
            .docs
            .read_all::<RenderRecord>()
            .await?
            .into_iter()
            .filter(|r| !r.is_terminal())
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(unfinished)
    }
}

/// Projects stored as `{dir}/{project_id}.json`.
#[derive(Debug)]
pub struct JsonProjectRepository {
    docs: JsonDir,
}

impl JsonProjectRepository {
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self {
            docs: JsonDir::open(dir, "project").await?,
        })
    }
}

#[async_trait]
impl ProjectRepository for JsonProjectRepository {
    async fn get(&self, project_id: &str) -> StoreResult<Option<Project>> {
        self.docs.read(project_id).await
    }

    async fn put(&self, project: &Project) -> StoreResult<()> {
        let _guard = self.docs.write_lock.lock().await;
        self.docs.write(&project.id, project).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::{RenderSettings, RenderStatus, Resolution, Timeline};

    #[tokio::test]
    async fn test_render_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0);
        let mut record = RenderRecord::new("p1", "u1", RenderSettings::defaults_for(&timeline));

        {
            let repo = JsonRenderRepository::open(dir.path()).await.unwrap();
            repo.create(&record).await.unwrap();
            record.status = RenderStatus::Processing;
            repo.save(&record).await.unwrap();
        }

        let repo = JsonRenderRepository::open(dir.path()).await.unwrap();
        let loaded = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(matches!(repo.create(&record).await, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_unfinished_records_listed_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Timeline::new(Resolution::new(1280, 720), 5.0);
        let pending = RenderRecord::new("p1", "u1", RenderSettings::defaults_for(&timeline));
        let mut interrupted = RenderRecord::new("p1", "u1", RenderSettings::defaults_for(&timeline));
        interrupted.status = RenderStatus::Processing;
        let mut failed = RenderRecord::new("p1", "u1", RenderSettings::defaults_for(&timeline));
        failed.status = RenderStatus::Failed;

        {
            let repo = JsonRenderRepository::open(dir.path()).await.unwrap();
            for record in [&pending, &interrupted, &failed] {
                repo.create(record).await.unwrap();
            }
        }
        tokio::fs::write(dir.path().join("stray.json.tmp"), b"{").await.unwrap();

        let repo = JsonRenderRepository::open(dir.path()).await.unwrap();
        let ids: Vec<_> = repo
            .list_unfinished()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&interrupted.id));
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonProjectRepository::open(dir.path()).await.unwrap();

        assert!(matches!(repo.get("../etc/passwd").await, Err(StoreError::InvalidKey(_))));
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_project_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonProjectRepository::open(dir.path()).await.unwrap();
        let project = Project::new("p1", "u1", Timeline::new(Resolution::new(1920, 1080), 12.0));

        repo.put(&project).await.unwrap();
        assert_eq!(repo.get("p1").await.unwrap(), Some(project));
    }
}
