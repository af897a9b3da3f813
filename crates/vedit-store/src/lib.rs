//! Persistence for render records and project lookups.
//!
//! The render pipeline only needs two narrow contracts: persist render
//! record fields, and fetch a project's owner and timeline. Both come with
//! an in-memory implementation (tests, single-process dev) and a JSON-file
//! implementation.

pub mod error;
pub mod json;
pub mod memory;
pub mod repos;

pub use error::{StoreError, StoreResult};
pub use json::{JsonProjectRepository, JsonRenderRepository};
pub use memory::{InMemoryProjectRepository, InMemoryRenderRepository};
pub use repos::{ProjectRepository, RenderRepository};
