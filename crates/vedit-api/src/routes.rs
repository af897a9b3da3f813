//! API routes.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{get_queue_stats, get_render_status, health, ready, start_render};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_logging, security_headers, IpRateLimiter,
};
use crate::state::AppState;
use crate::ws::ws_render;

const RATE_LIMITER_SHRINK_INTERVAL: Duration = Duration::from_secs(60);

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let render_routes = Router::new()
        .route("/render/start", post(start_render))
        .route("/render/queue/stats", get(get_queue_stats))
        .route("/render/:render_id/status", get(get_render_status));

    let rate_limiter = Arc::new(IpRateLimiter::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));
    spawn_limiter_cleanup(Arc::clone(&rate_limiter));

    let api_routes = Router::new()
        .merge(render_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let ws_routes = Router::new().route("/ws/render", get(ws_render));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

/// Periodically drop idle per-IP limiter state.
fn spawn_limiter_cleanup(limiter: Arc<IpRateLimiter>) {
    // Router construction outside a runtime (unit tests) skips the sweeper
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMITER_SHRINK_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            limiter.shrink();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::test_support::{test_state, token};

    #[tokio::test]
    async fn test_health_has_request_id() {
        let app = create_router(test_state().await, None);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_start_requires_auth() {
        let app = create_router(test_state().await, None);
        let response = app
            .oneshot(
                Request::post("/api/render/start")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"projectId":"project-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_start_then_status() {
        let app = create_router(test_state().await, None);
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/render/start")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token("alice")))
                    .body(Body::from(r#"{"projectId":"project-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let job: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let render_id = job["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/render/{}/status", render_id))
                    .header(header::AUTHORIZATION, format!("Bearer {}", token("alice")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["status"], "queued");

        let response = app
            .oneshot(
                Request::get(format!("/api/render/{}/status", render_id))
                    .header(header::AUTHORIZATION, format!("Bearer {}", token("mallory")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_foreign_project_forbidden() {
        let app = create_router(test_state().await, None);
        let response = app
            .oneshot(
                Request::post("/api/render/start")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token("mallory")))
                    .body(Body::from(r#"{"projectId":"project-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
