//! Partner-interaction session.
//!
//! One `Session` per logged-in user: a store, the controllers that mutate it,
//! and a pump that turns gateway push events into refetches.

pub mod bursts;
pub mod heartbeat;
pub mod quests;
pub mod registry;
pub mod store;
pub mod synchro;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Timings;
use crate::errors::AppError;
use crate::features::{FeatureFlags, COOPERATIVE_QUESTS, SERENDIPITY_BURSTS, SYNCHRO_BEAT};
use crate::gateway::{GatewayEvent, RemoteSyncGateway};
use crate::models::PartnerStatusUpdate;

use bursts::BurstFeed;
use heartbeat::{HeartRateSource, HeartbeatEngine};
use quests::QuestTracker;
use store::{SessionStore, SharedStore};
use synchro::SynchroRitual;
use task::TaskHandle;

/// The acting user and, once linked, their partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub user_id: String,
    pub partner_id: Option<String>,
}

impl Pair {
    pub fn partner(&self) -> Result<&str, AppError> {
        self.partner_id.as_deref().ok_or(AppError::MissingPartner)
    }
}

/// Process-wide settings every session is built with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub flags: FeatureFlags,
    pub timings: Timings,
    pub burst_limit: u32,
}

/// Everything a controller needs; cheap to clone.
#[derive(Clone)]
pub struct SessionContext {
    pub pair: Pair,
    pub store: SharedStore,
    pub gateway: Arc<dyn RemoteSyncGateway>,
    pub settings: Arc<SessionSettings>,
}

impl SessionContext {
    /// Upsert our own status record. Failures are logged, never surfaced.
    pub async fn publish_status(&self, update: PartnerStatusUpdate, op: &'static str) {
        if let Err(e) = self
            .gateway
            .update_partner_status(&self.pair.user_id, &update)
            .await
        {
            warn!(user_id = %self.pair.user_id, op, error = %e, "Status update failed");
        }
    }
}

/// Serialized view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user_id: String,
    pub partner_id: Option<String>,
    #[serde(flatten)]
    pub state: SessionStore,
}

pub struct Session {
    ctx: SessionContext,
    pub heartbeat: HeartbeatEngine,
    pub synchro: SynchroRitual,
    pub quests: QuestTracker,
    pub bursts: BurstFeed,
    pump: Mutex<Option<TaskHandle>>,
}

impl Session {
    /// Build the session, go online and load the pair's current state.
    pub async fn login(
        pair: Pair,
        gateway: Arc<dyn RemoteSyncGateway>,
        settings: Arc<SessionSettings>,
        source: Arc<dyn HeartRateSource>,
    ) -> Arc<Self> {
        let store = SessionStore::with_countdown(settings.timings.countdown_secs).shared();
        let ctx = SessionContext {
            pair,
            store,
            gateway,
            settings,
        };

        let session = Arc::new(Self {
            heartbeat: HeartbeatEngine::new(ctx.clone(), source),
            synchro: SynchroRitual::new(ctx.clone()),
            quests: QuestTracker::new(ctx.clone()),
            bursts: BurstFeed::new(ctx.clone()),
            pump: Mutex::new(None),
            ctx,
        });

        // Subscribe before the first fetch so nothing slips between them.
        if session.ctx.pair.partner_id.is_some() {
            let events = session.ctx.gateway.subscribe();
            let weak = Arc::downgrade(&session);
            *session.pump.lock().await =
                Some(TaskHandle::spawn(move |token| pump(weak, events, token)));
        }

        session
            .ctx
            .publish_status(
                PartnerStatusUpdate {
                    is_online: Some(true),
                    ..Default::default()
                },
                "login",
            )
            .await;
        session.resync().await;

        info!(
            user_id = %session.ctx.pair.user_id,
            partner_id = ?session.ctx.pair.partner_id,
            "Session started"
        );
        session
    }

    pub fn pair(&self) -> &Pair {
        &self.ctx.pair
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.ctx.pair.user_id.clone(),
            partner_id: self.ctx.pair.partner_id.clone(),
            state: self.ctx.store.read().await.clone(),
        }
    }

    /// Refetch everything the store projects. Each part fails independently.
    pub async fn resync(&self) {
        if self.ctx.pair.partner_id.is_none() {
            return;
        }
        let flags = &self.ctx.settings.flags;

        if let Err(e) = self.refresh_presence().await {
            warn!(user_id = %self.ctx.pair.user_id, error = %e, "Presence refresh failed");
        }
        if flags.is_feature_enabled(SYNCHRO_BEAT) {
            if let Err(e) = self.synchro.reconcile().await {
                warn!(user_id = %self.ctx.pair.user_id, error = %e, "Ritual reconcile failed");
            }
        }
        if flags.is_feature_enabled(COOPERATIVE_QUESTS) {
            if let Err(e) = self.quests.refresh().await {
                warn!(user_id = %self.ctx.pair.user_id, error = %e, "Quest refresh failed");
            }
        }
        if flags.is_feature_enabled(SERENDIPITY_BURSTS) {
            if let Err(e) = self.bursts.refresh().await {
                warn!(user_id = %self.ctx.pair.user_id, error = %e, "Burst refresh failed");
            }
        }
    }

    /// Mirror the partner's presence record into the store.
    pub async fn refresh_presence(&self) -> Result<(), AppError> {
        let partner_id = self.ctx.pair.partner()?;
        let status = self.ctx.gateway.get_partner_status(partner_id).await?;

        let mut store = self.ctx.store.write().await;
        store.set_partner_connected(status.as_ref().is_some_and(|s| s.is_online));
        store.set_connection_strength(status.map_or(0, |s| s.connection_strength as i64));
        Ok(())
    }

    /// An event only marks a slice stale; the slice is refetched.
    async fn handle_event(&self, event: GatewayEvent) {
        let flags = &self.ctx.settings.flags;
        let result = match &event {
            GatewayEvent::PartnerStatusChanged { .. } => self.refresh_presence().await,
            GatewayEvent::SynchroSessionChanged { .. } if flags.is_feature_enabled(SYNCHRO_BEAT) => {
                self.synchro.reconcile().await
            }
            GatewayEvent::CooperativeQuestChanged { .. }
                if flags.is_feature_enabled(COOPERATIVE_QUESTS) =>
            {
                self.quests.refresh().await.map(drop)
            }
            GatewayEvent::SerendipityBurstInserted { .. }
                if flags.is_feature_enabled(SERENDIPITY_BURSTS) =>
            {
                self.bursts.refresh().await.map(drop)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(user_id = %self.ctx.pair.user_id, ?event, error = %e, "Refetch after push failed");
        }
    }

    /// Stop every task, go offline and clear the store.
    pub async fn logout(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.cancel().await;
        }
        self.heartbeat.stop().await;
        self.synchro.leave().await;

        self.ctx
            .publish_status(
                PartnerStatusUpdate {
                    is_online: Some(false),
                    heartbeat_active: Some(false),
                    ..Default::default()
                },
                "logout",
            )
            .await;
        self.ctx.store.write().await.reset_all();
        info!(user_id = %self.ctx.pair.user_id, "Session ended");
    }
}

async fn pump(
    session: Weak<Session>,
    mut events: broadcast::Receiver<GatewayEvent>,
    token: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = events.recv() => received,
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        let pair = &session.ctx.pair;
        let Some(partner_id) = pair.partner_id.as_deref() else {
            break;
        };

        match received {
            Ok(event) if event.concerns(&pair.user_id, partner_id) => {
                debug!(user_id = %pair.user_id, ?event, "Push event");
                session.handle_event(event).await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(user_id = %pair.user_id, skipped, "Push events dropped, resyncing");
                session.resync().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}
