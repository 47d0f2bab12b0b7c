//! In-memory state for one authenticated session.
//!
//! The store never performs I/O. Setters are total: numeric input outside its
//! range is clamped rather than rejected.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::models::{
    CooperativeQuest, HeartbeatSyncState, SerendipityBurst, SyncQuality, SynchroBeatState,
    SynchroSession, SynchroStage, SYNCHRO_COUNTDOWN_START,
};

/// Store handle shared by the controllers of one session.
pub type SharedStore = Arc<RwLock<SessionStore>>;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStore {
    pub heartbeat: HeartbeatSyncState,
    pub synchro: SynchroBeatState,
    pub quests: Vec<CooperativeQuest>,
    pub bursts: Vec<SerendipityBurst>,
    pub connection_strength: u8,
    #[serde(skip)]
    countdown_start: u32,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_countdown(SYNCHRO_COUNTDOWN_START)
    }
}

impl SessionStore {
    /// Store whose ritual countdown restarts from `countdown_start` seconds.
    pub fn with_countdown(countdown_start: u32) -> Self {
        Self {
            heartbeat: HeartbeatSyncState::default(),
            synchro: SynchroBeatState {
                countdown: countdown_start,
                ..SynchroBeatState::default()
            },
            quests: Vec::new(),
            bursts: Vec::new(),
            connection_strength: 0,
            countdown_start,
        }
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    // ==================== HEARTBEAT ====================

    pub fn set_heartbeat_active(&mut self, active: bool) {
        if active && !self.heartbeat.is_active {
            self.heartbeat.last_sync = Some(Utc::now());
        }
        self.heartbeat.is_active = active;
    }

    pub fn set_charge_level(&mut self, level: f64) {
        // NaN samples count as an empty charge.
        self.heartbeat.charge_level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 100.0)
        };
    }

    pub fn set_heart_rates(&mut self, user_rate: f64, partner_rate: Option<f64>) {
        self.heartbeat.user_heart_rate = Some(user_rate);
        self.heartbeat.partner_heart_rate = partner_rate;
        self.heartbeat.last_sync = Some(Utc::now());
        self.heartbeat.sync_quality = SyncQuality::from_rates(user_rate, partner_rate);
    }

    pub fn reset_heartbeat(&mut self) {
        self.heartbeat = HeartbeatSyncState::default();
    }

    // ==================== SYNCHRO-BEAT ====================

    pub fn set_synchro_beat_stage(&mut self, stage: SynchroStage) {
        if stage == SynchroStage::Counting {
            self.synchro.countdown = self.countdown_start;
        }
        self.synchro.stage = stage;
        self.synchro.is_active = stage != SynchroStage::Idle;
    }

    pub fn set_synchro_beat_countdown(&mut self, seconds: i64) {
        self.synchro.countdown = seconds.clamp(0, u32::MAX as i64) as u32;
    }

    pub fn set_partner_connected(&mut self, connected: bool) {
        self.synchro.partner_connected = connected;
    }

    /// Attach the remote session backing the current run, or detach it.
    pub fn set_synchro_session(&mut self, session: Option<&SynchroSession>) {
        self.synchro.session_id = session.map(|s| s.id.clone());
        self.synchro.initiator_id = session.map(|s| s.initiator_id.clone());
    }

    pub fn reset_synchro(&mut self) {
        self.synchro = SynchroBeatState {
            countdown: self.countdown_start,
            ..SynchroBeatState::default()
        };
    }

    // ==================== CONNECTION ====================

    pub fn set_connection_strength(&mut self, strength: i64) {
        self.connection_strength = strength.clamp(0, 100) as u8;
    }

    // ==================== QUESTS & BURSTS ====================

    /// Replace the quest projection with the gateway's latest snapshot.
    pub fn set_quests(&mut self, quests: Vec<CooperativeQuest>) {
        self.quests = quests;
    }

    pub fn quest(&self, quest_id: &str) -> Option<&CooperativeQuest> {
        self.quests.iter().find(|q| q.id == quest_id)
    }

    pub fn set_bursts(&mut self, bursts: Vec<SerendipityBurst>) {
        self.bursts = bursts;
    }

    /// Returns false when the burst is not in the projection.
    pub fn mark_burst_read(&mut self, burst_id: &str) -> bool {
        match self.bursts.iter_mut().find(|b| b.id == burst_id) {
            Some(burst) => {
                burst.is_new = false;
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&mut self) {
        *self = Self::with_countdown(self.countdown_start);
    }
}
