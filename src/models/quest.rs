//! Cooperative quest model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a quest step belongs to, relative to the quest's creator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Assignment {
    User,
    Partner,
    Both,
}

impl Assignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Assignment::User => "user",
            Assignment::Partner => "partner",
            Assignment::Both => "both",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Assignment::User),
            "partner" => Some(Assignment::Partner),
            "both" => Some(Assignment::Both),
            _ => None,
        }
    }
}

/// One step of a cooperative quest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub assigned_to: Assignment,
    pub requires_both: bool,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Users who have attributed completion so far
    #[serde(default)]
    pub completions: Vec<String>,
}

impl QuestStep {
    /// Whether a participant holding `role` may act on this step.
    pub fn is_assigned_to(&self, role: Assignment) -> bool {
        self.assigned_to == Assignment::Both || self.assigned_to == role
    }

    pub fn completed_by_user(&self, user_id: &str) -> bool {
        self.completions.iter().any(|u| u == user_id)
    }
}

/// A multi-step shared goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CooperativeQuest {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Creator of the quest; `Assignment::User` refers to this user
    pub user_id: String,
    pub partner_id: String,
    pub reward: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Server-computed percentage of completed steps
    pub progress: f64,
    /// Past its deadline without reaching 100%, as of the last refresh
    #[serde(default)]
    pub is_overdue: bool,
    pub steps: Vec<QuestStep>,
}

impl CooperativeQuest {
    /// Role of `user_id` in this quest, or `None` for outsiders.
    pub fn role_of(&self, user_id: &str) -> Option<Assignment> {
        if user_id == self.user_id {
            Some(Assignment::User)
        } else if user_id == self.partner_id {
            Some(Assignment::Partner)
        } else {
            None
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&QuestStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.progress < 100.0 && self.deadline.is_some_and(|d| d < now)
    }

    /// Recompute `is_overdue` against `now`.
    pub fn stamp_overdue(&mut self, now: DateTime<Utc>) {
        self.is_overdue = self.overdue_at(now);
    }
}

/// Step definition supplied when creating a quest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub assigned_to: Assignment,
    #[serde(default)]
    pub requires_both: bool,
}

/// Request body for creating a quest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reward: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<NewQuestStep>,
}

/// Quest as handed to the gateway, with the owning pair filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCooperativeQuest {
    pub title: String,
    pub description: String,
    pub user_id: String,
    pub partner_id: String,
    pub reward: String,
    pub deadline: Option<DateTime<Utc>>,
    pub steps: Vec<NewQuestStep>,
}
