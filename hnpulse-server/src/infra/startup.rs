use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::infra::{app_state::AppState, refresh::DailyScheduler};

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(
        &self,
        state: &AppState,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

/// Starts the daily scheduler when it is enabled.
#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(
        &self,
        state: &AppState,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let schedule = &state.config.schedule;
        if !schedule.enabled {
            info!("daily scheduler disabled");
            return Ok(());
        }

        let scheduler = DailyScheduler::new(
            Arc::clone(&state.runner),
            schedule.daily,
            Arc::clone(&state.clock),
        )
        .with_poll_interval(schedule.poll_interval);
        state.track_background(Arc::new(scheduler).spawn(shutdown));

        Ok(())
    }
}
