//! Runs a scheduler on the tokio runtime

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Scheduler;

/// Tick `scheduler` every `period` until `token` is cancelled.
///
/// Ticks that fall behind are skipped rather than bursted; the scheduler
/// itself catches up on delayed tasks using its clock.
pub fn spawn_driver(scheduler: Scheduler, period: Duration, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(scheduler = scheduler.name(), ?period, "scheduler driver started");
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(scheduler = scheduler.name(), "scheduler driver cancelled");
                    break;
                }
                _ = interval.tick() => {
                    scheduler.tick();
                }
            }
        }

        info!(scheduler = scheduler.name(), "scheduler driver stopped");
    })
}
