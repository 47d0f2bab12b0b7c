//! Synchro-beat ritual state machine.
//!
//! `idle -> preparing -> counting -> breathing -> complete -> idle`
//!
//! The initiator moves to preparing by creating a remote session; the partner
//! gets there through the session push. Joining starts the counting stage on
//! the joiner, and the initiator follows when it sees the session counting.
//! From counting on, each side advances on its own timers and remote
//! persistence is best-effort.

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::TaskHandle;
use super::SessionContext;
use crate::errors::AppError;
use crate::features::SYNCHRO_BEAT;
use crate::models::{SynchroSessionStatus, SynchroSessionUpdate, SynchroStage};

pub struct SynchroRitual {
    ctx: SessionContext,
    timer: Mutex<Option<TaskHandle>>,
}

impl SynchroRitual {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            timer: Mutex::new(None),
        }
    }

    /// Invite the partner: `idle -> preparing`.
    pub async fn start(&self) -> Result<(), AppError> {
        self.ctx.settings.flags.require(SYNCHRO_BEAT)?;
        let partner_id = self.ctx.pair.partner()?;

        let stage = self.ctx.store.read().await.synchro.stage;
        if stage != SynchroStage::Idle {
            return Err(AppError::Conflict(format!(
                "Ritual already in progress ({:?})",
                stage
            )));
        }

        if !self.partner_present(partner_id).await {
            return Err(AppError::PartnerOffline);
        }

        let session = self
            .ctx
            .gateway
            .create_synchro_session(&self.ctx.pair.user_id, partner_id)
            .await
            .inspect_err(|e| {
                warn!(
                    user_id = %self.ctx.pair.user_id,
                    partner_id,
                    error = %e,
                    "Synchro session creation failed"
                )
            })?;

        let mut store = self.ctx.store.write().await;
        if store.synchro.stage != SynchroStage::Idle {
            // The partner's invitation arrived first; keep theirs.
            debug!(session_id = %session.id, "Dropping own invitation, already preparing");
            return Ok(());
        }
        store.set_synchro_session(Some(&session));
        store.set_synchro_beat_stage(SynchroStage::Preparing);
        info!(session_id = %session.id, "Synchro-beat invitation sent");
        Ok(())
    }

    /// Accept the invitation: `preparing -> counting`.
    pub async fn join(&self) -> Result<(), AppError> {
        self.ctx.settings.flags.require(SYNCHRO_BEAT)?;
        self.ctx.pair.partner()?;

        let session_id = {
            let store = self.ctx.store.read().await;
            let synchro = &store.synchro;
            match (&synchro.stage, &synchro.session_id) {
                (SynchroStage::Preparing, Some(_))
                    if synchro.initiator_id.as_ref() == Some(&self.ctx.pair.user_id) =>
                {
                    return Err(AppError::Conflict(
                        "Waiting for the partner to join".to_string(),
                    ))
                }
                (SynchroStage::Preparing, Some(id)) => id.clone(),
                (stage, _) => {
                    return Err(AppError::Conflict(format!(
                        "No ritual invitation to join ({:?})",
                        stage
                    )))
                }
            }
        };

        self.enter_counting(&session_id).await;
        persist(
            &self.ctx,
            &session_id,
            SynchroSessionUpdate::status(SynchroSessionStatus::Counting),
        )
        .await;
        Ok(())
    }

    /// Leave a finished ritual: `complete -> idle`, then pick up any
    /// invitation that arrived meanwhile.
    pub async fn restart(&self) -> Result<(), AppError> {
        self.ctx.settings.flags.require(SYNCHRO_BEAT)?;

        let stage = self.ctx.store.read().await.synchro.stage;
        if stage != SynchroStage::Complete {
            return Err(AppError::Conflict(format!(
                "Ritual is not complete ({:?})",
                stage
            )));
        }
        if let Some(timer) = self.timer.lock().await.take() {
            timer.cancel().await;
        }
        self.return_to_idle().await;
        if let Err(e) = self.reconcile().await {
            warn!(
                user_id = %self.ctx.pair.user_id,
                error = %e,
                "Synchro reconcile after restart failed"
            );
        }
        Ok(())
    }

    /// Abandon the current run from any stage. The remote session is marked
    /// cancelled; a no-op when idle.
    pub async fn leave(&self) {
        if let Some(timer) = self.timer.lock().await.take() {
            timer.cancel().await;
        }

        let (stage, session_id) = {
            let store = self.ctx.store.read().await;
            (store.synchro.stage, store.synchro.session_id.clone())
        };
        if stage == SynchroStage::Idle {
            return;
        }
        if let (Some(session_id), true) = (session_id, stage != SynchroStage::Complete) {
            persist(
                &self.ctx,
                &session_id,
                SynchroSessionUpdate::status(SynchroSessionStatus::Cancelled),
            )
            .await;
        }
        info!(user_id = %self.ctx.pair.user_id, ?stage, "Left synchro-beat ritual");
        self.return_to_idle().await;
    }

    /// Re-derive the local stage from the latest remote session.
    pub async fn reconcile(&self) -> Result<(), AppError> {
        let Ok(partner_id) = self.ctx.pair.partner() else {
            return Ok(());
        };
        let active = self
            .ctx
            .gateway
            .get_active_synchro_session(&self.ctx.pair.user_id, partner_id)
            .await?;

        let (stage, local_id) = {
            let store = self.ctx.store.read().await;
            (store.synchro.stage, store.synchro.session_id.clone())
        };

        match (stage, active) {
            // Invitation from the partner.
            (SynchroStage::Idle, Some(session))
                if session.partner_id == self.ctx.pair.user_id
                    && session.status == SynchroSessionStatus::Preparing =>
            {
                let mut store = self.ctx.store.write().await;
                if store.synchro.stage == SynchroStage::Idle {
                    store.set_partner_connected(true);
                    store.set_synchro_session(Some(&session));
                    store.set_synchro_beat_stage(SynchroStage::Preparing);
                    info!(session_id = %session.id, "Synchro-beat invitation received");
                }
            }
            // The partner joined our session.
            (SynchroStage::Preparing, Some(session))
                if Some(&session.id) == local_id.as_ref()
                    && session.status == SynchroSessionStatus::Counting =>
            {
                self.enter_counting(&session.id).await;
            }
            // Our pending session was cancelled or expired.
            (SynchroStage::Preparing, None) => {
                info!(user_id = %self.ctx.pair.user_id, "Synchro-beat invitation withdrawn");
                self.return_to_idle().await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn enter_counting(&self, session_id: &str) {
        let mut timer = self.timer.lock().await;
        {
            let mut store = self.ctx.store.write().await;
            if store.synchro.stage != SynchroStage::Preparing
                || store.synchro.session_id.as_deref() != Some(session_id)
            {
                return;
            }
            store.set_synchro_beat_stage(SynchroStage::Counting);
        }
        info!(session_id, "Synchro-beat countdown started");

        if let Some(previous) = timer.take() {
            previous.cancel().await;
        }
        let ctx = self.ctx.clone();
        let session_id = session_id.to_string();
        *timer = Some(TaskHandle::spawn(move |token| {
            run_ritual(ctx, session_id, token)
        }));
    }

    /// Presence straight from the gateway, falling back to the last pushed value.
    async fn partner_present(&self, partner_id: &str) -> bool {
        match self.ctx.gateway.get_partner_status(partner_id).await {
            Ok(status) => {
                let online = status.is_some_and(|s| s.is_online);
                self.ctx.store.write().await.set_partner_connected(online);
                online
            }
            Err(e) => {
                warn!(
                    user_id = %self.ctx.pair.user_id,
                    partner_id,
                    error = %e,
                    "Presence check failed, using last known presence"
                );
                self.ctx.store.read().await.synchro.partner_connected
            }
        }
    }

    async fn return_to_idle(&self) {
        let mut store = self.ctx.store.write().await;
        let connected = store.synchro.partner_connected;
        store.reset_synchro();
        store.set_partner_connected(connected);
    }
}

/// Countdown then breathing, each driven by local timers.
async fn run_ritual(ctx: SessionContext, session_id: String, token: CancellationToken) {
    let started = Instant::now();
    let second = std::time::Duration::from_secs(1);
    let mut ticker = interval_at(Instant::now() + second, second);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let remaining = {
            let mut store = ctx.store.write().await;
            if store.synchro.stage != SynchroStage::Counting {
                return;
            }
            let next = store.synchro.countdown.saturating_sub(1);
            store.set_synchro_beat_countdown(next as i64);
            next
        };
        // Each tick is a haptic cue on the client.
        debug!(session_id = %session_id, remaining, "Synchro-beat countdown tick");
        if remaining == 0 {
            break;
        }
    }

    if !advance(&ctx, SynchroStage::Counting, SynchroStage::Breathing).await {
        return;
    }
    persist(
        &ctx,
        &session_id,
        SynchroSessionUpdate::status(SynchroSessionStatus::Breathing),
    )
    .await;

    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(ctx.settings.timings.breathing) => {}
    }

    if !advance(&ctx, SynchroStage::Breathing, SynchroStage::Complete).await {
        return;
    }
    let completed_at = Utc::now();
    let sync_quality = ctx.store.read().await.heartbeat.sync_quality;
    info!(session_id = %session_id, ?sync_quality, "Synchro-beat ritual complete");
    persist(
        &ctx,
        &session_id,
        SynchroSessionUpdate {
            status: Some(SynchroSessionStatus::Completed),
            completed_at: Some(completed_at),
            duration_seconds: Some(started.elapsed().as_secs() as i64),
            sync_quality: Some(sync_quality),
        },
    )
    .await;
}

/// Move `from -> to` only if the ritual is still where the timer left it.
async fn advance(ctx: &SessionContext, from: SynchroStage, to: SynchroStage) -> bool {
    let mut store = ctx.store.write().await;
    if store.synchro.stage != from || !from.can_advance_to(to) {
        return false;
    }
    store.set_synchro_beat_stage(to);
    true
}

async fn persist(ctx: &SessionContext, session_id: &str, update: SynchroSessionUpdate) {
    if let Err(e) = ctx.gateway.update_synchro_session(session_id, &update).await {
        warn!(
            user_id = %ctx.pair.user_id,
            session_id,
            status = ?update.status,
            error = %e,
            "Synchro session update failed"
        );
    }
}
