//! In-memory gateway for controller tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{GatewayEvent, RemoteSyncGateway};
use crate::errors::AppError;
use crate::models::{
    BurstRecord, CooperativeQuest, NewBurst, NewCooperativeQuest, PartnerStatus,
    PartnerStatusUpdate, QuestStep, SynchroSession, SynchroSessionStatus, SynchroSessionUpdate,
};

#[derive(Default)]
struct MockState {
    statuses: HashMap<String, PartnerStatus>,
    sessions: Vec<SynchroSession>,
    bursts: Vec<BurstRecord>,
    quests: Vec<CooperativeQuest>,
    completions: Vec<(String, String)>,
    deleted_quests: Vec<String>,
    progress_override: HashMap<String, f64>,
    fail_writes: bool,
    fail_step_inserts: bool,
}

pub struct MockGateway {
    state: Mutex<MockState>,
    events: broadcast::Sender<GatewayEvent>,
}

impl MockGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MockState::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn status_entry<'a>(state: &'a mut MockState, user_id: &str) -> &'a mut PartnerStatus {
        state
            .statuses
            .entry(user_id.to_string())
            .or_insert_with(|| PartnerStatus {
                user_id: user_id.to_string(),
                heartbeat_active: false,
                current_bpm: None,
                charge_level: 0.0,
                is_online: false,
                connection_strength: 0,
                updated_at: Utc::now(),
            })
    }

    fn check_writes(&self) -> Result<(), AppError> {
        if self.state().fail_writes {
            Err(AppError::Internal("gateway unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Mark `user_id` online and monitoring at `bpm`.
    pub fn set_partner_bpm(&self, user_id: &str, bpm: Option<f64>) {
        let mut state = self.state();
        let status = Self::status_entry(&mut state, user_id);
        status.is_online = true;
        status.heartbeat_active = bpm.is_some();
        status.current_bpm = bpm;
    }

    pub fn set_online(&self, user_id: &str, online: bool) {
        let mut state = self.state();
        Self::status_entry(&mut state, user_id).is_online = online;
    }

    pub fn set_connection_strength(&self, user_id: &str, strength: u8) {
        let mut state = self.state();
        Self::status_entry(&mut state, user_id).connection_strength = strength;
    }

    /// Make every write fail until switched back.
    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Make quest creation stop after the quest row, before its steps.
    pub fn fail_step_inserts(&self, fail: bool) {
        self.state().fail_step_inserts = fail;
    }

    /// Report `progress` for the quest regardless of its steps.
    pub fn override_progress(&self, quest_id: &str, progress: f64) {
        self.state()
            .progress_override
            .insert(quest_id.to_string(), progress);
    }

    /// Send an event as if another process had written.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    pub fn status_of(&self, user_id: &str) -> Option<PartnerStatus> {
        self.state().statuses.get(user_id).cloned()
    }

    pub fn session(&self, session_id: &str) -> Option<SynchroSession> {
        self.state()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
    }

    pub fn sessions(&self) -> Vec<SynchroSession> {
        self.state().sessions.clone()
    }

    pub fn bursts(&self) -> Vec<BurstRecord> {
        self.state().bursts.clone()
    }

    pub fn quests(&self) -> Vec<CooperativeQuest> {
        self.state().quests.clone()
    }

    pub fn completions(&self) -> Vec<(String, String)> {
        self.state().completions.clone()
    }

    pub fn deleted_quests(&self) -> Vec<String> {
        self.state().deleted_quests.clone()
    }

    fn with_progress(state: &MockState, mut quest: CooperativeQuest) -> CooperativeQuest {
        if let Some(progress) = state.progress_override.get(&quest.id) {
            quest.progress = *progress;
        }
        quest
    }
}

#[async_trait]
impl RemoteSyncGateway for MockGateway {
    async fn update_partner_status(
        &self,
        user_id: &str,
        update: &PartnerStatusUpdate,
    ) -> Result<PartnerStatus, AppError> {
        self.check_writes()?;
        let status = {
            let mut state = self.state();
            let status = Self::status_entry(&mut state, user_id);
            if let Some(active) = update.heartbeat_active {
                status.heartbeat_active = active;
            }
            if let Some(bpm) = update.current_bpm {
                status.current_bpm = Some(bpm);
            }
            if let Some(charge) = update.charge_level {
                status.charge_level = charge.clamp(0.0, 100.0);
            }
            if let Some(online) = update.is_online {
                status.is_online = online;
            }
            if let Some(strength) = update.connection_strength {
                status.connection_strength = strength.min(100);
            }
            status.updated_at = Utc::now();
            status.clone()
        };
        self.emit(GatewayEvent::PartnerStatusChanged {
            user_id: user_id.to_string(),
        });
        Ok(status)
    }

    async fn get_partner_status(
        &self,
        partner_id: &str,
    ) -> Result<Option<PartnerStatus>, AppError> {
        Ok(self.status_of(partner_id))
    }

    async fn create_synchro_session(
        &self,
        initiator_id: &str,
        partner_id: &str,
    ) -> Result<SynchroSession, AppError> {
        self.check_writes()?;
        let now = Utc::now();
        let session = SynchroSession {
            id: Uuid::new_v4().to_string(),
            initiator_id: initiator_id.to_string(),
            partner_id: partner_id.to_string(),
            status: SynchroSessionStatus::Preparing,
            created_at: now,
            updated_at: now,
            completed_at: None,
            duration_seconds: None,
            sync_quality: None,
        };
        self.state().sessions.push(session.clone());
        self.emit(GatewayEvent::SynchroSessionChanged {
            session_id: session.id.clone(),
            initiator_id: session.initiator_id.clone(),
            partner_id: session.partner_id.clone(),
        });
        Ok(session)
    }

    async fn update_synchro_session(
        &self,
        session_id: &str,
        update: &SynchroSessionUpdate,
    ) -> Result<SynchroSession, AppError> {
        self.check_writes()?;
        let session = {
            let mut state = self.state();
            let session = state
                .sessions
                .iter_mut()
                .find(|s| s.id == session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;
            if let Some(status) = update.status {
                session.status = status;
            }
            if update.completed_at.is_some() {
                session.completed_at = update.completed_at;
            }
            if update.duration_seconds.is_some() {
                session.duration_seconds = update.duration_seconds;
            }
            if update.sync_quality.is_some() {
                session.sync_quality = update.sync_quality;
            }
            session.updated_at = Utc::now();
            session.clone()
        };
        self.emit(GatewayEvent::SynchroSessionChanged {
            session_id: session.id.clone(),
            initiator_id: session.initiator_id.clone(),
            partner_id: session.partner_id.clone(),
        });
        Ok(session)
    }

    async fn get_active_synchro_session(
        &self,
        user_id: &str,
        partner_id: &str,
    ) -> Result<Option<SynchroSession>, AppError> {
        Ok(self
            .state()
            .sessions
            .iter()
            .rev()
            .find(|s| {
                s.status.is_active()
                    && ((s.initiator_id == user_id && s.partner_id == partner_id)
                        || (s.initiator_id == partner_id && s.partner_id == user_id))
            })
            .cloned())
    }

    async fn create_serendipity_burst(
        &self,
        from_user: &str,
        to_user: &str,
        burst: &NewBurst,
    ) -> Result<BurstRecord, AppError> {
        self.check_writes()?;
        let record = BurstRecord {
            id: Uuid::new_v4().to_string(),
            from_user: from_user.to_string(),
            to_user: to_user.to_string(),
            burst_type: burst.burst_type,
            content: burst.content.clone(),
            emotion: burst.emotion.clone(),
            timestamp: Utc::now(),
            is_read: false,
        };
        self.state().bursts.push(record.clone());
        self.emit(GatewayEvent::SerendipityBurstInserted {
            to_user: to_user.to_string(),
        });
        Ok(record)
    }

    async fn get_serendipity_bursts(
        &self,
        user_id: &str,
        partner_id: &str,
        limit: u32,
    ) -> Result<Vec<BurstRecord>, AppError> {
        Ok(self
            .state()
            .bursts
            .iter()
            .rev()
            .filter(|b| {
                (b.from_user == user_id && b.to_user == partner_id)
                    || (b.from_user == partner_id && b.to_user == user_id)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_serendipity_burst_read(
        &self,
        burst_id: &str,
        reader_id: &str,
    ) -> Result<(), AppError> {
        self.check_writes()?;
        let mut state = self.state();
        let burst = state
            .bursts
            .iter_mut()
            .find(|b| b.id == burst_id)
            .ok_or_else(|| AppError::NotFound(format!("Burst {} not found", burst_id)))?;
        if burst.to_user != reader_id {
            return Err(AppError::Forbidden(
                "Only the recipient can mark a burst read".to_string(),
            ));
        }
        burst.is_read = true;
        Ok(())
    }

    async fn create_cooperative_quest(
        &self,
        quest: &NewCooperativeQuest,
    ) -> Result<CooperativeQuest, AppError> {
        self.check_writes()?;
        let quest_id = Uuid::new_v4().to_string();
        let steps = quest
            .steps
            .iter()
            .map(|step| QuestStep {
                id: Uuid::new_v4().to_string(),
                title: step.title.clone(),
                description: step.description.clone(),
                assigned_to: step.assigned_to,
                requires_both: step.requires_both,
                is_completed: false,
                completed_by: None,
                completed_at: None,
                completions: Vec::new(),
            })
            .collect();
        let mut created = CooperativeQuest {
            id: quest_id.clone(),
            title: quest.title.clone(),
            description: quest.description.clone(),
            user_id: quest.user_id.clone(),
            partner_id: quest.partner_id.clone(),
            reward: quest.reward.clone(),
            created_at: Utc::now(),
            deadline: quest.deadline,
            is_active: true,
            progress: 0.0,
            is_overdue: false,
            steps,
        };

        let partial = {
            let mut state = self.state();
            if state.fail_step_inserts {
                created.steps.clear();
            }
            state.quests.push(created.clone());
            state.fail_step_inserts
        };
        self.emit(GatewayEvent::CooperativeQuestChanged {
            user_id: created.user_id.clone(),
            partner_id: created.partner_id.clone(),
        });

        if partial {
            return Err(AppError::PartialWrite {
                quest_id,
                message: "step insert failed".to_string(),
            });
        }
        Ok(created)
    }

    async fn get_cooperative_quests(
        &self,
        user_id: &str,
        partner_id: &str,
    ) -> Result<Vec<CooperativeQuest>, AppError> {
        let state = self.state();
        Ok(state
            .quests
            .iter()
            .rev()
            .filter(|q| {
                q.is_active
                    && ((q.user_id == user_id && q.partner_id == partner_id)
                        || (q.user_id == partner_id && q.partner_id == user_id))
            })
            .map(|q| Self::with_progress(&state, q.clone()))
            .collect())
    }

    async fn delete_cooperative_quest(&self, quest_id: &str) -> Result<(), AppError> {
        let mut state = self.state();
        let before = state.quests.len();
        state.quests.retain(|q| q.id != quest_id);
        if state.quests.len() == before {
            return Err(AppError::NotFound(format!("Quest {} not found", quest_id)));
        }
        state.deleted_quests.push(quest_id.to_string());
        Ok(())
    }

    async fn complete_quest_step(
        &self,
        step_id: &str,
        user_id: &str,
    ) -> Result<QuestStep, AppError> {
        self.check_writes()?;
        let mut state = self.state();
        let quest = state
            .quests
            .iter_mut()
            .find(|q| q.step(step_id).is_some())
            .ok_or_else(|| AppError::NotFound(format!("Quest step {} not found", step_id)))?;
        let role = quest
            .role_of(user_id)
            .ok_or_else(|| AppError::Forbidden(format!("{} is not part of this quest", user_id)))?;
        let (owner, partner) = (quest.user_id.clone(), quest.partner_id.clone());

        let step = quest
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| AppError::NotFound(format!("Quest step {} not found", step_id)))?;
        if !step.is_assigned_to(role) {
            return Err(AppError::Forbidden(format!(
                "Step {} is not assigned to {}",
                step_id, user_id
            )));
        }
        if step.is_completed || step.completed_by_user(user_id) {
            return Err(AppError::Conflict(format!(
                "Step {} already completed by {}",
                step_id, user_id
            )));
        }

        step.completions.push(user_id.to_string());
        let done = !step.requires_both
            || (step.completed_by_user(&owner) && step.completed_by_user(&partner));
        if done {
            step.is_completed = true;
            step.completed_by = Some(user_id.to_string());
            step.completed_at = Some(Utc::now());
        }
        let updated = step.clone();

        let completed = quest.steps.iter().filter(|s| s.is_completed).count();
        quest.progress = completed as f64 / quest.steps.len() as f64 * 100.0;

        state
            .completions
            .push((step_id.to_string(), user_id.to_string()));
        drop(state);

        self.emit(GatewayEvent::CooperativeQuestChanged {
            user_id: owner,
            partner_id: partner,
        });
        Ok(updated)
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}
