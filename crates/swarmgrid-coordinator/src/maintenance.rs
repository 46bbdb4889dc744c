//! Background maintenance loop.
//!
//! One task drives every periodic sweep. Each tick locks the coordinator
//! through the handle, so sweeps are serialized with device events.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use swarmgrid_core::SwarmConfig;

use crate::handle::SwarmHandle;

/// Tick periods for each sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub health_sweep: Duration,
    pub reaper: Duration,
    pub rebalance: Duration,
    pub code_cleanup: Duration,
}

impl MaintenanceSchedule {
    pub fn from_config(config: &SwarmConfig) -> Self {
        Self {
            health_sweep: config.registry.health_sweep_interval(),
            reaper: config.scheduler.reaper_interval(),
            rebalance: config.coordinator.rebalance_interval(),
            code_cleanup: config.join_codes.cleanup_interval(),
        }
    }
}

/// Run every sweep on its own interval until `shutdown` flips.
pub async fn run(
    handle: SwarmHandle,
    schedule: MaintenanceSchedule,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        health_sweep_secs = schedule.health_sweep.as_secs(),
        reaper_secs = schedule.reaper.as_secs(),
        rebalance_secs = schedule.rebalance.as_secs(),
        "maintenance loop started"
    );

    let mut health = ticker(schedule.health_sweep);
    let mut reaper = ticker(schedule.reaper);
    let mut rebalance = ticker(schedule.rebalance);
    let mut cleanup = ticker(schedule.code_cleanup);

    loop {
        tokio::select! {
            _ = health.tick() => {
                let stale = handle.with(|c| c.sweep_stale_devices()).await;
                if !stale.is_empty() {
                    info!(count = stale.len(), "stale devices marked offline");
                }
            }
            _ = reaper.tick() => {
                let reclaimed = handle.with(|c| c.reap_expired_jobs()).await;
                if reclaimed > 0 {
                    info!(count = reclaimed, "expired assignments reclaimed");
                }
            }
            _ = rebalance.tick() => {
                let moved = handle.with(|c| c.rebalance()).await;
                debug!(moved, "rebalance tick");
            }
            _ = cleanup.tick() => {
                let removed = handle.with(|c| c.cleanup_join_codes()).await;
                debug!(removed, "join code cleanup tick");
            }
            _ = shutdown.changed() => {
                info!("maintenance loop shutting down");
                break;
            }
        }
    }
}

/// An interval that skips its immediate first tick.
fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.reset();
    ticker
}
