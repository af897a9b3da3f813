//! Render worker.
//!
//! This crate provides:
//! - The Render Orchestrator, sole writer of render records
//! - The render-start/status service
//! - The per-attempt render pipeline (compile, encode, store)
//! - A fixed-size worker pool with retry settlement and graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod render_job;
pub mod service;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::WorkerPool;
pub use logging::JobLogger;
pub use orchestrator::RenderOrchestrator;
pub use render_job::{process_render, RenderContext};
pub use service::{RenderService, StartRenderRequest};
