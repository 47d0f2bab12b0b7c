//! Builders shared by the controller tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::heartbeat::HeartRateSource;
use super::store::SessionStore;
use super::{Pair, SessionContext, SessionSettings};
use crate::config::Timings;
use crate::features::FeatureFlags;
use crate::gateway::mock::MockGateway;
use crate::gateway::DEFAULT_BURST_LIMIT;

pub(crate) fn settings(flags: FeatureFlags) -> SessionSettings {
    SessionSettings {
        flags,
        timings: Timings::default(),
        burst_limit: DEFAULT_BURST_LIMIT,
    }
}

fn build(gateway: Arc<MockGateway>, pair: Pair, flags: FeatureFlags) -> SessionContext {
    let settings = settings(flags);
    SessionContext {
        pair,
        store: SessionStore::with_countdown(settings.timings.countdown_secs).shared(),
        gateway,
        settings: Arc::new(settings),
    }
}

/// alice, paired with bob.
pub(crate) fn context(gateway: Arc<MockGateway>) -> SessionContext {
    context_for(gateway, "alice", "bob")
}

pub(crate) fn context_for(gateway: Arc<MockGateway>, user: &str, partner: &str) -> SessionContext {
    build(
        gateway,
        Pair {
            user_id: user.to_string(),
            partner_id: Some(partner.to_string()),
        },
        FeatureFlags::default(),
    )
}

pub(crate) fn context_with_flags(gateway: Arc<MockGateway>, flags: FeatureFlags) -> SessionContext {
    build(
        gateway,
        Pair {
            user_id: "alice".to_string(),
            partner_id: Some("bob".to_string()),
        },
        flags,
    )
}

pub(crate) fn solo_context(gateway: Arc<MockGateway>, user: &str) -> SessionContext {
    build(
        gateway,
        Pair {
            user_id: user.to_string(),
            partner_id: None,
        },
        FeatureFlags::default(),
    )
}

/// Replays fixed samples, repeating the last one once exhausted.
pub(crate) struct ScriptedHeartRate {
    samples: Vec<f64>,
    next: AtomicUsize,
}

impl ScriptedHeartRate {
    pub(crate) fn new(samples: impl IntoIterator<Item = f64>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn constant(bpm: f64) -> Self {
        Self::new([bpm])
    }
}

impl HeartRateSource for ScriptedHeartRate {
    fn sample(&self) -> f64 {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let last = self.samples.len().saturating_sub(1);
        self.samples.get(index.min(last)).copied().unwrap_or(0.0)
    }
}
