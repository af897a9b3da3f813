//! HTTP and WebSocket surface for the render pipeline.
//!
//! - `POST /api/render/start`, `GET /api/render/:id/status`, queue stats
//! - `GET /ws/render` progress subscriptions
//! - JWT auth, per-IP rate limiting, Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use auth::{AuthUser, Claims, JwtVerifier};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
