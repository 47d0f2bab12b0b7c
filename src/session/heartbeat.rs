//! Heartbeat sync engine.
//!
//! While active, a loop samples the local heart rate every interval, compares
//! it with the partner's live rate and turns the difference into charge.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::task::TaskHandle;
use super::SessionContext;
use crate::errors::AppError;
use crate::features::HEARTBEAT_SYNC;
use crate::models::PartnerStatusUpdate;

/// Charge gained per tick when the partner's rate is unavailable.
pub const SOLO_CHARGE_DELTA: f64 = 0.5;

/// Charge gained by one sampling tick.
pub fn charge_delta(user_rate: f64, partner_rate: Option<f64>) -> f64 {
    let Some(partner_rate) = partner_rate else {
        return SOLO_CHARGE_DELTA;
    };
    let diff = (user_rate - partner_rate).abs();
    if diff < 5.0 {
        3.0
    } else if diff < 10.0 {
        2.0
    } else {
        1.0
    }
}

/// Source of local heart-rate samples in bpm.
pub trait HeartRateSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Sensor stand-in: resting rate plus uniform jitter.
#[derive(Debug, Clone)]
pub struct SimulatedHeartRate {
    pub resting_bpm: f64,
    pub jitter_bpm: f64,
}

impl Default for SimulatedHeartRate {
    fn default() -> Self {
        Self {
            resting_bpm: 72.0,
            jitter_bpm: 8.0,
        }
    }
}

impl HeartRateSource for SimulatedHeartRate {
    fn sample(&self) -> f64 {
        let jitter = rand::thread_rng().gen_range(-self.jitter_bpm..=self.jitter_bpm);
        (self.resting_bpm + jitter).round()
    }
}

pub struct HeartbeatEngine {
    ctx: SessionContext,
    source: Arc<dyn HeartRateSource>,
    task: Mutex<Option<TaskHandle>>,
}

impl HeartbeatEngine {
    pub fn new(ctx: SessionContext, source: Arc<dyn HeartRateSource>) -> Self {
        Self {
            ctx,
            source,
            task: Mutex::new(None),
        }
    }

    /// Start monitoring. Calling it while a loop is running does not add a second loop.
    pub async fn start(&self) -> Result<(), AppError> {
        self.ctx.settings.flags.require(HEARTBEAT_SYNC)?;

        {
            let mut task = self.task.lock().await;
            if task.as_ref().is_some_and(|t| !t.is_finished()) {
                debug!(user_id = %self.ctx.pair.user_id, "Heartbeat sync already running");
                return Ok(());
            }

            self.ctx.store.write().await.set_heartbeat_active(true);

            let ctx = self.ctx.clone();
            let source = self.source.clone();
            *task = Some(TaskHandle::spawn(move |token| {
                run_loop(ctx, source, token)
            }));
        }
        info!(user_id = %self.ctx.pair.user_id, "Heartbeat sync started");

        self.ctx
            .publish_status(
                PartnerStatusUpdate {
                    heartbeat_active: Some(true),
                    ..Default::default()
                },
                "heartbeat start",
            )
            .await;

        // A stop may have landed while the remote call was in flight.
        if !self.ctx.store.read().await.heartbeat.is_active {
            self.ctx
                .publish_status(
                    PartnerStatusUpdate {
                        heartbeat_active: Some(false),
                        ..Default::default()
                    },
                    "heartbeat start",
                )
                .await;
        }
        Ok(())
    }

    /// Stop monitoring. Idempotent; no tick runs after this returns.
    pub async fn stop(&self) {
        let running = {
            let mut task = self.task.lock().await;
            self.ctx.store.write().await.set_heartbeat_active(false);
            task.take()
        };

        let Some(running) = running else {
            return;
        };
        running.cancel().await;
        info!(user_id = %self.ctx.pair.user_id, "Heartbeat sync stopped");

        self.ctx
            .publish_status(
                PartnerStatusUpdate {
                    heartbeat_active: Some(false),
                    ..Default::default()
                },
                "heartbeat stop",
            )
            .await;
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

async fn run_loop(
    ctx: SessionContext,
    source: Arc<dyn HeartRateSource>,
    token: CancellationToken,
) {
    let period = ctx.settings.timings.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick(&ctx, source.as_ref()) => {}
        }
    }
    debug!(user_id = %ctx.pair.user_id, "Heartbeat loop exited");
}

/// One sampling tick. Returns the new charge, or `None` if monitoring was stopped.
pub(crate) async fn tick(ctx: &SessionContext, source: &dyn HeartRateSource) -> Option<f64> {
    let user_rate = source.sample();
    let partner_rate = match ctx.pair.partner_id.as_deref() {
        Some(partner_id) => match ctx.gateway.get_partner_status(partner_id).await {
            Ok(status) => status.and_then(|s| s.live_bpm()),
            Err(e) => {
                warn!(
                    user_id = %ctx.pair.user_id,
                    partner_id,
                    error = %e,
                    "Partner status fetch failed, syncing solo this tick"
                );
                None
            }
        },
        None => None,
    };

    let charge = {
        let mut store = ctx.store.write().await;
        if !store.heartbeat.is_active {
            return None;
        }
        store.set_heart_rates(user_rate, partner_rate);
        let level = store.heartbeat.charge_level + charge_delta(user_rate, partner_rate);
        store.set_charge_level(level);
        store.heartbeat.charge_level
    };
    debug!(user_rate, ?partner_rate, charge, "Heartbeat tick");

    ctx.publish_status(
        PartnerStatusUpdate {
            heartbeat_active: Some(true),
            current_bpm: Some(user_rate),
            charge_level: Some(charge),
            ..Default::default()
        },
        "heartbeat tick",
    )
    .await;
    Some(charge)
}
