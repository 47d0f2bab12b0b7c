//! Cooperative quest tracker.
//!
//! Progress is never computed here. Every mutation is followed by a refetch,
//! and the gateway's numbers replace whatever the store held.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::SessionContext;
use crate::errors::AppError;
use crate::features::COOPERATIVE_QUESTS;
use crate::models::{Assignment, CooperativeQuest, CreateQuestRequest, NewCooperativeQuest};

pub struct QuestTracker {
    ctx: SessionContext,
}

impl QuestTracker {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    /// Reload the pair's active quests into the store.
    pub async fn refresh(&self) -> Result<Vec<CooperativeQuest>, AppError> {
        self.ctx.settings.flags.require(COOPERATIVE_QUESTS)?;
        let partner_id = self.ctx.pair.partner()?;

        let mut quests = self
            .ctx
            .gateway
            .get_cooperative_quests(&self.ctx.pair.user_id, partner_id)
            .await?;

        let now = Utc::now();
        for quest in quests.iter_mut() {
            quest.stamp_overdue(now);
            if quest.is_overdue {
                debug!(quest_id = %quest.id, "Quest is past its deadline");
            }
        }

        self.ctx.store.write().await.set_quests(quests.clone());
        Ok(quests)
    }

    pub async fn create_quest(
        &self,
        request: CreateQuestRequest,
    ) -> Result<CooperativeQuest, AppError> {
        self.ctx.settings.flags.require(COOPERATIVE_QUESTS)?;
        let partner_id = self.ctx.pair.partner()?;
        validate_quest(&request)?;

        let new_quest = NewCooperativeQuest {
            title: request.title.trim().to_string(),
            description: request.description,
            user_id: self.ctx.pair.user_id.clone(),
            partner_id: partner_id.to_string(),
            reward: request.reward,
            deadline: request.deadline,
            steps: request.steps,
        };

        let mut quest = match self.ctx.gateway.create_cooperative_quest(&new_quest).await {
            Ok(quest) => quest,
            Err(AppError::PartialWrite { quest_id, message }) => {
                warn!(quest_id = %quest_id, %message, "Quest created without steps, removing it");
                if let Err(e) = self.ctx.gateway.delete_cooperative_quest(&quest_id).await {
                    warn!(quest_id = %quest_id, error = %e, "Orphaned quest cleanup failed");
                }
                return Err(AppError::PartialWrite { quest_id, message });
            }
            Err(e) => {
                warn!(user_id = %self.ctx.pair.user_id, error = %e, "Quest creation failed");
                return Err(e);
            }
        };
        quest.stamp_overdue(Utc::now());
        info!(quest_id = %quest.id, steps = quest.steps.len(), "Quest created");

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Quest refresh after create failed");
        }
        Ok(quest)
    }

    /// Attribute a step to the acting user, then reload the quest from the gateway.
    pub async fn complete_step(
        &self,
        quest_id: &str,
        step_id: &str,
    ) -> Result<CooperativeQuest, AppError> {
        self.ctx.settings.flags.require(COOPERATIVE_QUESTS)?;
        self.ctx.pair.partner()?;

        let cached = self.ctx.store.read().await.quest(quest_id).cloned();
        let quest = match cached {
            Some(quest) => quest,
            None => self
                .refresh()
                .await?
                .into_iter()
                .find(|q| q.id == quest_id)
                .ok_or_else(|| AppError::NotFound(format!("Quest {} not found", quest_id)))?,
        };

        let user_id = &self.ctx.pair.user_id;
        let role = quest
            .role_of(user_id)
            .ok_or_else(|| AppError::Forbidden(format!("{} is not part of this quest", user_id)))?;
        let step = quest
            .step(step_id)
            .ok_or_else(|| AppError::NotFound(format!("Quest step {} not found", step_id)))?;

        if !step.is_assigned_to(role) {
            return Err(AppError::Forbidden(format!(
                "Step {} is assigned to {}",
                step_id,
                step.assigned_to.as_str()
            )));
        }
        if step.is_completed || step.completed_by_user(user_id) {
            return Err(AppError::Conflict(format!(
                "Step {} is already completed",
                step_id
            )));
        }

        self.ctx
            .gateway
            .complete_quest_step(step_id, user_id)
            .await
            .inspect_err(|e| {
                warn!(quest_id, step_id, error = %e, "Quest step completion failed")
            })?;
        info!(quest_id, step_id, "Quest step completed");

        self.refresh()
            .await?
            .into_iter()
            .find(|q| q.id == quest_id)
            .ok_or_else(|| AppError::NotFound(format!("Quest {} not found", quest_id)))
    }
}

fn validate_quest(request: &CreateQuestRequest) -> Result<(), AppError> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if request.steps.is_empty() {
        return Err(AppError::Validation(
            "A quest needs at least one step".to_string(),
        ));
    }
    for (index, step) in request.steps.iter().enumerate() {
        if step.title.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "Step {} needs a title",
                index + 1
            )));
        }
        if step.requires_both && step.assigned_to != Assignment::Both {
            return Err(AppError::Validation(format!(
                "Step {} requires both partners but is assigned to {}",
                index + 1,
                step.assigned_to.as_str()
            )));
        }
    }
    Ok(())
}
