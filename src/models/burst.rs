//! Serendipity burst model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BurstType {
    Photo,
    Message,
    Location,
    Achievement,
}

impl BurstType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BurstType::Photo => "photo",
            BurstType::Message => "message",
            BurstType::Location => "location",
            BurstType::Achievement => "achievement",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(BurstType::Photo),
            "message" => Some(BurstType::Message),
            "location" => Some(BurstType::Location),
            "achievement" => Some(BurstType::Achievement),
            _ => None,
        }
    }

    /// Check that `content` carries the keys this burst type is rendered from.
    pub fn validate_content(&self, content: &Value) -> Result<(), AppError> {
        let has_str = |key: &str| {
            content
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        };
        let has_num = |key: &str| content.get(key).and_then(Value::as_f64).is_some();

        let ok = match self {
            BurstType::Photo => has_str("url"),
            BurstType::Message => has_str("text"),
            BurstType::Location => has_num("latitude") && has_num("longitude"),
            BurstType::Achievement => has_str("title"),
        };
        if ok {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Invalid content for {} burst",
                self.as_str()
            )))
        }
    }
}

/// Burst as stored by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BurstRecord {
    pub id: String,
    pub from_user: String,
    pub to_user: String,
    #[serde(rename = "type")]
    pub burst_type: BurstType,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Burst as seen by one member of the pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SerendipityBurst {
    pub id: String,
    #[serde(rename = "type")]
    pub burst_type: BurstType,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    pub from_partner: bool,
    pub is_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

impl SerendipityBurst {
    pub fn from_record(record: BurstRecord, partner_id: &str) -> Self {
        let from_partner = record.from_user == partner_id;
        Self {
            id: record.id,
            burst_type: record.burst_type,
            content: record.content,
            timestamp: record.timestamp,
            from_partner,
            is_new: from_partner && !record.is_read,
            emotion: record.emotion,
        }
    }
}

/// Request body for sending a burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBurst {
    #[serde(rename = "type")]
    pub burst_type: BurstType,
    pub content: Value,
    #[serde(default)]
    pub emotion: Option<String>,
}
