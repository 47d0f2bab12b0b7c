//! Remote sync gateway contract.
//!
//! The gateway owns durable partner-interaction state and is the conflict
//! authority (last write wins on server timestamps). Push events only tell
//! subscribers that something changed; subscribers refetch to learn what.

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{
    BurstRecord, CooperativeQuest, NewBurst, NewCooperativeQuest, PartnerStatus,
    PartnerStatusUpdate, QuestStep, SynchroSession, SynchroSessionUpdate,
};

/// Default number of bursts returned by `get_serendipity_bursts`.
pub const DEFAULT_BURST_LIMIT: u32 = 50;

/// Change notification delivered to subscribers (at least once, unordered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PartnerStatusChanged {
        user_id: String,
    },
    SerendipityBurstInserted {
        to_user: String,
    },
    SynchroSessionChanged {
        session_id: String,
        initiator_id: String,
        partner_id: String,
    },
    CooperativeQuestChanged {
        user_id: String,
        partner_id: String,
    },
}

impl GatewayEvent {
    /// Whether this event concerns the pair `(user_id, partner_id)`.
    pub fn concerns(&self, user_id: &str, partner_id: &str) -> bool {
        let is_pair = |a: &str, b: &str| {
            (a == user_id && b == partner_id) || (a == partner_id && b == user_id)
        };
        match self {
            GatewayEvent::PartnerStatusChanged { user_id: changed } => changed == partner_id,
            GatewayEvent::SerendipityBurstInserted { to_user } => to_user == user_id,
            GatewayEvent::SynchroSessionChanged {
                initiator_id,
                partner_id: other,
                ..
            } => is_pair(initiator_id, other),
            GatewayEvent::CooperativeQuestChanged {
                user_id: owner,
                partner_id: other,
            } => is_pair(owner, other),
        }
    }
}

/// Durable store and push channel behind every partner-interaction feature.
#[async_trait]
pub trait RemoteSyncGateway: Send + Sync {
    async fn update_partner_status(
        &self,
        user_id: &str,
        update: &PartnerStatusUpdate,
    ) -> Result<PartnerStatus, AppError>;

    async fn get_partner_status(&self, partner_id: &str)
        -> Result<Option<PartnerStatus>, AppError>;

    async fn create_synchro_session(
        &self,
        initiator_id: &str,
        partner_id: &str,
    ) -> Result<SynchroSession, AppError>;

    async fn update_synchro_session(
        &self,
        session_id: &str,
        update: &SynchroSessionUpdate,
    ) -> Result<SynchroSession, AppError>;

    /// Most recent session between the pair still preparing, counting or breathing.
    async fn get_active_synchro_session(
        &self,
        user_id: &str,
        partner_id: &str,
    ) -> Result<Option<SynchroSession>, AppError>;

    async fn create_serendipity_burst(
        &self,
        from_user: &str,
        to_user: &str,
        burst: &NewBurst,
    ) -> Result<BurstRecord, AppError>;

    /// Bursts exchanged by the pair, newest first.
    async fn get_serendipity_bursts(
        &self,
        user_id: &str,
        partner_id: &str,
        limit: u32,
    ) -> Result<Vec<BurstRecord>, AppError>;

    /// Only the burst's recipient may mark it read.
    async fn mark_serendipity_burst_read(
        &self,
        burst_id: &str,
        reader_id: &str,
    ) -> Result<(), AppError>;

    async fn create_cooperative_quest(
        &self,
        quest: &NewCooperativeQuest,
    ) -> Result<CooperativeQuest, AppError>;

    /// Active quests of the pair, newest first.
    async fn get_cooperative_quests(
        &self,
        user_id: &str,
        partner_id: &str,
    ) -> Result<Vec<CooperativeQuest>, AppError>;

    async fn delete_cooperative_quest(&self, quest_id: &str) -> Result<(), AppError>;

    /// Record `user_id`'s completion of a step.
    async fn complete_quest_step(&self, step_id: &str, user_id: &str)
        -> Result<QuestStep, AppError>;

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}
