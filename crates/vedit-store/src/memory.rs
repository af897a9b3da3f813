//! In-memory repositories.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use vedit_models::{Project, RenderId, RenderRecord};

use crate::error::{StoreError, StoreResult};
use crate::repos::{ProjectRepository, RenderRepository};

#[derive(Debug, Default)]
pub struct InMemoryRenderRepository {
    records: RwLock<HashMap<RenderId, RenderRecord>>,
}

impl InMemoryRenderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RenderRepository for InMemoryRenderRepository {
    async fn create(&self, record: &RenderRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::already_exists(record.id.as_str()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &RenderId) -> StoreResult<Option<RenderRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save(&self, record: &RenderRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::not_found(record.id.as_str())),
        }
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<RenderRecord>> {
        let mut unfinished: Vec<RenderRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(unfinished)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProjectRepository {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn get(&self, project_id: &str) -> StoreResult<Option<Project>> {
        Ok(self.projects.read().await.get(project_id).cloned())
    }

    async fn put(&self, project: &Project) -> StoreResult<()> {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project.clone());
        Ok(())
    }
}
