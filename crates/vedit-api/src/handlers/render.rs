//! Render start/status endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use vedit_models::{RenderId, RenderJobView, RenderStatusView};
use vedit_queue::{HistoryEntry, QueueStats};
use vedit_worker::StartRenderRequest;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// History entries returned with queue stats.
const RECENT_HISTORY_LIMIT: usize = 20;

/// POST /api/render/start
pub async fn start_render(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<StartRenderRequest>,
) -> ApiResult<(StatusCode, Json<RenderJobView>)> {
    if request.project_id.trim().is_empty() {
        return Err(ApiError::bad_request("projectId is required"));
    }
    let view = state.renders.start_render(&user.user_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

/// GET /api/render/:render_id/status
pub async fn get_render_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(render_id): Path<String>,
) -> ApiResult<Json<RenderStatusView>> {
    let id = RenderId::from_string(render_id);
    let view = state.renders.status(&id, &user.user_id).await?;
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    #[serde(flatten)]
    pub stats: QueueStats,
    pub recent: Vec<HistoryEntry>,
}

/// GET /api/render/queue/stats
pub async fn get_queue_stats(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<QueueStatsResponse> {
    let stats = state.renders.queue_stats().await;
    metrics::set_queue_stats(&stats);
    let recent = state.renders.queue().history(RECENT_HISTORY_LIMIT).await;
    Json(QueueStatsResponse { stats, recent })
}
