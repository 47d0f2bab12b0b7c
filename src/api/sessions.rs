//! Session API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use super::{success, ApiResult};
use crate::session::SessionSnapshot;
use crate::AppState;

/// Request body for starting a session.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_id: String,
    #[serde(default)]
    pub partner_id: Option<String>,
}

/// POST /api/sessions - Log a user in, replacing any previous session.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<SessionSnapshot> {
    let session = state
        .registry
        .login(&request.user_id, request.partner_id.as_deref())
        .await?;
    success(session.snapshot().await)
}

/// GET /api/sessions/:user_id - Current session state.
pub async fn get_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<SessionSnapshot> {
    let session = state.registry.get(&user_id).await?;
    success(session.snapshot().await)
}

/// DELETE /api/sessions/:user_id - Log out and stop every background task.
pub async fn logout(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult<()> {
    state.registry.logout(&user_id).await?;
    success(())
}
