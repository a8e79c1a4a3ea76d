use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::browser_pool::pool::BrowserPool;

/// Spawns the periodic maintenance loop of `pool`.
///
/// Each tick refreshes idle sessions, recycles stale ones and recovers
/// courts that are missing or unhealthy; ticks that land during a critical
/// operation do nothing. The task ends when the pool
/// starts stopping.
pub fn spawn_maintenance(pool: Arc<BrowserPool>, interval: Duration) -> JoinHandle<()> {
    let mut shutdown = pool.shutdown_signal();
    tokio::spawn(async move {
        info!("Pool maintenance running every {}s", interval.as_secs());
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if pool.is_critical_operation_in_progress() {
                        debug!("Maintenance tick skipped, critical operation in progress");
                        continue;
                    }
                    let report = pool.refresh_all().await;
                    debug!(
                        "Maintenance refresh: {} refreshed, {} repositioned, {} failed, {} skipped",
                        report.refreshed.len(),
                        report.repositioned.len(),
                        report.failed.len(),
                        report.skipped.len()
                    );
                    let recycled = pool.recycle_stale().await;
                    if !recycled.is_empty() {
                        info!("Recycled courts {:?}", recycled);
                    }
                    if let Some(result) = pool.recover_failed("maintenance found failed courts").await {
                        info!("Maintenance recovery: {}", result.message);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Pool maintenance stopped");
    })
}
