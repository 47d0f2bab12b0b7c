//! Heartbeat sync slice of the session store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Below this bpm difference the two hearts are in excellent sync.
pub const EXCELLENT_SYNC_DIFF: f64 = 10.0;
/// Below this bpm difference the sync is good.
pub const GOOD_SYNC_DIFF: f64 = 20.0;

/// Coarse classification of how closely two heart-rate samples match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncQuality {
    #[default]
    Poor,
    Good,
    Excellent,
}

impl SyncQuality {
    /// Classify a pair of rates. A missing partner rate is always poor.
    pub fn from_rates(user_rate: f64, partner_rate: Option<f64>) -> Self {
        let Some(partner_rate) = partner_rate else {
            return SyncQuality::Poor;
        };
        let diff = (user_rate - partner_rate).abs();
        if diff < EXCELLENT_SYNC_DIFF {
            SyncQuality::Excellent
        } else if diff < GOOD_SYNC_DIFF {
            SyncQuality::Good
        } else {
            SyncQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncQuality::Poor => "poor",
            SyncQuality::Good => "good",
            SyncQuality::Excellent => "excellent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "poor" => Some(SyncQuality::Poor),
            "good" => Some(SyncQuality::Good),
            "excellent" => Some(SyncQuality::Excellent),
            _ => None,
        }
    }
}

/// Local heartbeat monitoring state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSyncState {
    pub is_active: bool,
    /// Accumulated connection energy, always within [0, 100]
    pub charge_level: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_heart_rate: Option<f64>,
    pub sync_quality: SyncQuality,
}
