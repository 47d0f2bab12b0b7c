//! Heartbeat sync and synchro-beat endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::models::{HeartbeatSyncState, SynchroBeatState};
use crate::AppState;

/// POST /api/sessions/:user_id/heartbeat/start
pub async fn start_heartbeat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<HeartbeatSyncState> {
    let session = state.registry.get(&user_id).await?;
    session.heartbeat.start().await?;
    success(session.snapshot().await.state.heartbeat)
}

/// POST /api/sessions/:user_id/heartbeat/stop
pub async fn stop_heartbeat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<HeartbeatSyncState> {
    let session = state.registry.get(&user_id).await?;
    session.heartbeat.stop().await;
    success(session.snapshot().await.state.heartbeat)
}

/// POST /api/sessions/:user_id/synchro/start - Invite the partner.
pub async fn start_synchro(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<SynchroBeatState> {
    let session = state.registry.get(&user_id).await?;
    session.synchro.start().await?;
    success(session.snapshot().await.state.synchro)
}

/// POST /api/sessions/:user_id/synchro/join - Accept the partner's invitation.
pub async fn join_synchro(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<SynchroBeatState> {
    let session = state.registry.get(&user_id).await?;
    session.synchro.join().await?;
    success(session.snapshot().await.state.synchro)
}

/// POST /api/sessions/:user_id/synchro/restart
pub async fn restart_synchro(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<SynchroBeatState> {
    let session = state.registry.get(&user_id).await?;
    session.synchro.restart().await?;
    success(session.snapshot().await.state.synchro)
}

/// POST /api/sessions/:user_id/synchro/leave
pub async fn leave_synchro(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<SynchroBeatState> {
    let session = state.registry.get(&user_id).await?;
    session.synchro.leave().await;
    success(session.snapshot().await.state.synchro)
}
