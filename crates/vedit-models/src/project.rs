//! Project as seen by the render pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timeline::Timeline;

/// The slice of a project the renderer needs: who owns it and its timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub name: String,
    pub timeline: Timeline,
}

impl Project {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, timeline: Timeline) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: String::new(),
            timeline,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}
