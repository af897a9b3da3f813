//! Repository contracts used by the render pipeline.

use async_trait::async_trait;

use vedit_models::{Project, RenderId, RenderRecord};

use crate::error::StoreResult;

/// Durable render records.
#[async_trait]
pub trait RenderRepository: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    async fn create(&self, record: &RenderRecord) -> StoreResult<()>;

    async fn get(&self, id: &RenderId) -> StoreResult<Option<RenderRecord>>;

    /// Overwrite an existing record. Fails if it does not exist.
    async fn save(&self, record: &RenderRecord) -> StoreResult<()>;

    /// Records not yet completed or failed, oldest first.
    async fn list_unfinished(&self) -> StoreResult<Vec<RenderRecord>>;
}

/// Project lookup by id, for the owner and timeline.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get(&self, project_id: &str) -> StoreResult<Option<Project>>;

    /// Insert or replace a project.
    async fn put(&self, project: &Project) -> StoreResult<()>;
}
