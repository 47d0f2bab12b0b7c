//! Feature flags gating the partner-interaction entry points.

use std::collections::HashSet;

use crate::errors::AppError;

pub const HEARTBEAT_SYNC: &str = "heartbeat_sync";
pub const SYNCHRO_BEAT: &str = "synchro_beat";
pub const COOPERATIVE_QUESTS: &str = "cooperative_quests";
pub const SERENDIPITY_BURSTS: &str = "serendipity_bursts";

/// Process-wide, read-only flag set. Every known feature is on unless disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    disabled: HashSet<String>,
}

impl FeatureFlags {
    pub fn with_disabled<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        !self.disabled.contains(flag)
    }

    /// Fail with `FeatureDisabled` before any state is touched.
    pub fn require(&self, flag: &'static str) -> Result<(), AppError> {
        if self.is_feature_enabled(flag) {
            Ok(())
        } else {
            Err(AppError::FeatureDisabled(flag))
        }
    }
}
