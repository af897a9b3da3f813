//! Output storage for finished renders.
//!
//! This crate provides:
//! - The `OutputStore` contract ("store an output file and return its address")
//! - A Cloudflare R2 (S3-compatible) implementation
//! - A local-directory implementation

pub mod client;
pub mod error;
pub mod local;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use local::LocalOutputStore;
pub use store::{content_type_for, extension_for, render_output_key, OutputStore};
