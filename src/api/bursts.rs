//! Serendipity burst endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::models::{NewBurst, SerendipityBurst};
use crate::AppState;

/// GET /api/sessions/:user_id/bursts - Recent bursts, newest first.
pub async fn list_bursts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<SerendipityBurst>> {
    let session = state.registry.get(&user_id).await?;
    success(session.bursts.refresh().await?)
}

/// POST /api/sessions/:user_id/bursts - Send a burst to the partner.
pub async fn send_burst(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(burst): Json<NewBurst>,
) -> ApiResult<SerendipityBurst> {
    let session = state.registry.get(&user_id).await?;
    success(session.bursts.send(burst).await?)
}

/// POST /api/sessions/:user_id/bursts/:burst_id/read
pub async fn mark_burst_read(
    State(state): State<AppState>,
    Path((user_id, burst_id)): Path<(String, String)>,
) -> ApiResult<()> {
    let session = state.registry.get(&user_id).await?;
    session.bursts.mark_read(&burst_id).await?;
    success(())
}
