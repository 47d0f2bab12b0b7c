//! Serendipity burst feed.

use tracing::{info, warn};

use super::SessionContext;
use crate::errors::AppError;
use crate::features::SERENDIPITY_BURSTS;
use crate::models::{NewBurst, SerendipityBurst};

pub struct BurstFeed {
    ctx: SessionContext,
}

impl BurstFeed {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx }
    }

    /// Reload the pair's recent bursts, newest first.
    pub async fn refresh(&self) -> Result<Vec<SerendipityBurst>, AppError> {
        self.ctx.settings.flags.require(SERENDIPITY_BURSTS)?;
        let partner_id = self.ctx.pair.partner()?;

        let bursts: Vec<SerendipityBurst> = self
            .ctx
            .gateway
            .get_serendipity_bursts(
                &self.ctx.pair.user_id,
                partner_id,
                self.ctx.settings.burst_limit,
            )
            .await?
            .into_iter()
            .map(|record| SerendipityBurst::from_record(record, partner_id))
            .collect();

        self.ctx.store.write().await.set_bursts(bursts.clone());
        Ok(bursts)
    }

    pub async fn send(&self, burst: NewBurst) -> Result<SerendipityBurst, AppError> {
        self.ctx.settings.flags.require(SERENDIPITY_BURSTS)?;
        let partner_id = self.ctx.pair.partner()?;
        burst.burst_type.validate_content(&burst.content)?;

        let record = self
            .ctx
            .gateway
            .create_serendipity_burst(&self.ctx.pair.user_id, partner_id, &burst)
            .await
            .inspect_err(|e| warn!(user_id = %self.ctx.pair.user_id, error = %e, "Burst send failed"))?;
        info!(burst_id = %record.id, burst_type = record.burst_type.as_str(), "Burst sent");

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Burst refresh after send failed");
        }
        Ok(SerendipityBurst::from_record(record, partner_id))
    }

    /// Acknowledge a burst received from the partner.
    pub async fn mark_read(&self, burst_id: &str) -> Result<(), AppError> {
        self.ctx.settings.flags.require(SERENDIPITY_BURSTS)?;
        self.ctx.pair.partner()?;

        self.ctx
            .gateway
            .mark_serendipity_burst_read(burst_id, &self.ctx.pair.user_id)
            .await?;
        if !self.ctx.store.write().await.mark_burst_read(burst_id) {
            self.refresh().await?;
        }
        Ok(())
    }
}
