//! Synchro-beat ritual slice and its remote session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SyncQuality;

/// Seconds on the clock whenever a ritual enters the counting stage.
pub const SYNCHRO_COUNTDOWN_START: u32 = 15;

/// Local stage of the ritual.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynchroStage {
    #[default]
    Idle,
    Preparing,
    Counting,
    Breathing,
    Complete,
}

impl SynchroStage {
    pub const ALL: [SynchroStage; 5] = [
        SynchroStage::Idle,
        SynchroStage::Preparing,
        SynchroStage::Counting,
        SynchroStage::Breathing,
        SynchroStage::Complete,
    ];

    fn rank(&self) -> u8 {
        match self {
            SynchroStage::Idle => 0,
            SynchroStage::Preparing => 1,
            SynchroStage::Counting => 2,
            SynchroStage::Breathing => 3,
            SynchroStage::Complete => 4,
        }
    }

    /// Remote status recorded when a run enters this stage.
    pub fn session_status(&self) -> Option<SynchroSessionStatus> {
        match self {
            SynchroStage::Idle => None,
            SynchroStage::Preparing => Some(SynchroSessionStatus::Preparing),
            SynchroStage::Counting => Some(SynchroSessionStatus::Counting),
            SynchroStage::Breathing => Some(SynchroSessionStatus::Breathing),
            SynchroStage::Complete => Some(SynchroSessionStatus::Completed),
        }
    }

    /// Stages only move forward within a run; the only way back is the reset to idle.
    pub fn can_advance_to(&self, next: SynchroStage) -> bool {
        next == SynchroStage::Idle || next.rank() > self.rank()
    }
}

/// Local ritual state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SynchroBeatState {
    pub is_active: bool,
    pub countdown: u32,
    pub stage: SynchroStage,
    pub partner_connected: bool,
    /// Remote session backing the current run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Who created that session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_id: Option<String>,
}

impl Default for SynchroBeatState {
    fn default() -> Self {
        Self {
            is_active: false,
            countdown: SYNCHRO_COUNTDOWN_START,
            stage: SynchroStage::Idle,
            partner_connected: false,
            session_id: None,
            initiator_id: None,
        }
    }
}

/// Status of a persisted ritual session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynchroSessionStatus {
    Preparing,
    Counting,
    Breathing,
    Completed,
    Cancelled,
}

impl SynchroSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynchroSessionStatus::Preparing => "preparing",
            SynchroSessionStatus::Counting => "counting",
            SynchroSessionStatus::Breathing => "breathing",
            SynchroSessionStatus::Completed => "completed",
            SynchroSessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "preparing" => Some(SynchroSessionStatus::Preparing),
            "counting" => Some(SynchroSessionStatus::Counting),
            "breathing" => Some(SynchroSessionStatus::Breathing),
            "completed" => Some(SynchroSessionStatus::Completed),
            "cancelled" => Some(SynchroSessionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SynchroSessionStatus::Preparing
                | SynchroSessionStatus::Counting
                | SynchroSessionStatus::Breathing
        )
    }
}

/// Persisted ritual session between two partners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SynchroSession {
    pub id: String,
    pub initiator_id: String,
    pub partner_id: String,
    pub status: SynchroSessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_quality: Option<SyncQuality>,
}

/// Partial update of a session record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynchroSessionUpdate {
    pub status: Option<SynchroSessionStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub sync_quality: Option<SyncQuality>,
}

impl SynchroSessionUpdate {
    pub fn status(status: SynchroSessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}
