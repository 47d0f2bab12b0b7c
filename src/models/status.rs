//! Partner presence record shared through the sync gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last-written presence and heartbeat status for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartnerStatus {
    pub user_id: String,
    pub heartbeat_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_bpm: Option<f64>,
    pub charge_level: f64,
    pub is_online: bool,
    pub connection_strength: u8,
    pub updated_at: DateTime<Utc>,
}

impl PartnerStatus {
    /// Heart rate usable for syncing: only while the owner is online and monitoring.
    pub fn live_bpm(&self) -> Option<f64> {
        if self.is_online && self.heartbeat_active {
            self.current_bpm
        } else {
            None
        }
    }
}

/// Partial upsert of a status record. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartnerStatusUpdate {
    #[serde(default)]
    pub heartbeat_active: Option<bool>,
    #[serde(default)]
    pub current_bpm: Option<f64>,
    #[serde(default)]
    pub charge_level: Option<f64>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub connection_strength: Option<u8>,
}
