// src/orchestrator/refresh.rs

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::message::{Request, Response};
use super::OrchestratorHandle;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Copy, Debug)]
pub struct RefreshSchedulerCfg {
    pub interval: Duration,
}

impl Default for RefreshSchedulerCfg {
    fn default() -> Self {
        Self {
            interval: REFRESH_INTERVAL,
        }
    }
}

/// Periodically asks the orchestrator to refresh every market source. The
/// first tick is one full interval after start. Stops once the orchestrator
/// is gone.
pub fn spawn_refresh_scheduler(handle: OrchestratorHandle, cfg: RefreshSchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = cfg.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match handle.request(Request::RefreshMarkets).await {
                Ok(Response::Refreshed { markets, errors }) => {
                    info!(target: "refresh", ?markets, failed = errors.len(), "market refresh tick");
                }
                Ok(other) => {
                    warn!(target: "refresh", reply = ?other, "unexpected refresh reply");
                }
                Err(e) => {
                    info!(target: "refresh", error = %e, "orchestrator gone, stopping refresh");
                    break;
                }
            }
        }
    })
}
