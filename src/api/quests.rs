//! Cooperative quest endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::models::{CooperativeQuest, CreateQuestRequest};
use crate::AppState;

/// GET /api/sessions/:user_id/quests - Active quests of the pair.
pub async fn list_quests(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<CooperativeQuest>> {
    let session = state.registry.get(&user_id).await?;
    success(session.quests.refresh().await?)
}

/// POST /api/sessions/:user_id/quests - Create a quest with its steps.
pub async fn create_quest(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<CreateQuestRequest>,
) -> ApiResult<CooperativeQuest> {
    let session = state.registry.get(&user_id).await?;
    success(session.quests.create_quest(request).await?)
}

/// POST /api/sessions/:user_id/quests/:quest_id/steps/:step_id/complete
pub async fn complete_quest_step(
    State(state): State<AppState>,
    Path((user_id, quest_id, step_id)): Path<(String, String, String)>,
) -> ApiResult<CooperativeQuest> {
    let session = state.registry.get(&user_id).await?;
    success(session.quests.complete_step(&quest_id, &step_id).await?)
}
