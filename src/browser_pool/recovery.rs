//! Escalating recovery of failed courts.
//!
//! One failing court is first recreated alone, then together with every
//! other failing court. Several failing courts start at the partial pool.
//! Only a pool with no live session at all is torn down and started again,
//! so a court that stays down never costs the healthy ones their sessions.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::time::Instant;

use crate::browser_pool::pool::BrowserPool;
use crate::browser_pool::types::{RecoveryAttempt, RecoveryResult, RecoveryStrategy};
use crate::configuration::types::CourtNumber;

fn ladder(failed: Option<&[CourtNumber]>) -> &'static [RecoveryStrategy] {
    match failed {
        None | Some([]) => &[RecoveryStrategy::FullRestart],
        Some([_]) => &[RecoveryStrategy::IndividualCourt, RecoveryStrategy::PartialPool],
        Some(_) => &[RecoveryStrategy::PartialPool],
    }
}

impl BrowserPool {
    /// Brings `failed` courts back, escalating through the strategies until
    /// one recovers at least one court. `None` means the whole pool failed.
    /// Each strategy runs within `recovery_timeout`; every attempt is kept
    /// in the pool's recovery history.
    pub async fn recover(self: &Arc<Self>, failed: Option<Vec<CourtNumber>>, reason: &str) -> RecoveryResult {
        let _recovery = self.recovery.lock().await;
        let started = Instant::now();
        let limit = self.config().recovery_timeout();
        let failed = failed.filter(|courts| !courts.is_empty());
        warn!("Starting pool recovery (failed courts {:?}): {}", failed, reason);

        let mut attempts = Vec::new();
        let mut strategy_used = None;
        let mut courts_failed = failed.clone().unwrap_or_else(|| self.requested_courts().to_vec());

        for &strategy in ladder(failed.as_deref()) {
            let courts = match strategy {
                RecoveryStrategy::IndividualCourt => failed.clone().unwrap_or_default(),
                RecoveryStrategy::PartialPool => {
                    let mut courts = failed.clone().unwrap_or_default();
                    courts.extend(self.failed_courts().await);
                    courts.sort_unstable();
                    courts.dedup();
                    courts
                }
                RecoveryStrategy::FullRestart => self.requested_courts().to_vec(),
            };
            info!("Recovery strategy {:?} for courts {:?}", strategy, courts);

            let at = Utc::now();
            let attempt_started = Instant::now();
            let (recovered, still_failed, error) =
                match tokio::time::timeout(limit, self.run_strategy(strategy, &courts)).await {
                    Ok(Ok((recovered, still_failed))) => (recovered, still_failed, None),
                    Ok(Err(e)) => (Vec::new(), courts.clone(), Some(e)),
                    Err(_) => (
                        Vec::new(),
                        courts.clone(),
                        Some(format!("gave up after {}s", limit.as_secs())),
                    ),
                };
            let success = !recovered.is_empty();
            let attempt = RecoveryAttempt {
                strategy,
                at,
                courts_affected: courts,
                success,
                error,
                duration_ms: attempt_started.elapsed().as_millis() as u64,
            };
            self.record_recovery(attempt.clone()).await;
            attempts.push(attempt);
            strategy_used = Some(strategy);
            courts_failed = still_failed;

            if success {
                info!(
                    "Recovery succeeded with {:?}: courts {:?} back, {:?} still failed",
                    strategy, recovered, courts_failed
                );
                return RecoveryResult {
                    success: true,
                    strategy_used,
                    message: format!(
                        "Recovered {}/{} courts",
                        recovered.len(),
                        recovered.len() + courts_failed.len()
                    ),
                    courts_recovered: recovered,
                    courts_failed,
                    attempts,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
            warn!("Recovery strategy {:?} did not bring any court back", strategy);
        }

        error!("All recovery strategies failed for courts {:?}", courts_failed);
        RecoveryResult {
            success: false,
            strategy_used,
            courts_recovered: Vec::new(),
            courts_failed,
            message: format!("All {} recovery strategies failed", attempts.len()),
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Recovers whatever is broken right now: the whole pool when it has no
    /// live session, otherwise the failed courts. Does nothing while a
    /// booking is in flight, once the pool is stopping, or when every court
    /// is up.
    pub async fn recover_failed(self: &Arc<Self>, reason: &str) -> Option<RecoveryResult> {
        if self.is_critical_operation_in_progress() {
            debug!("Recovery skipped, critical operation in progress");
            return None;
        }
        if *self.shutdown_signal().borrow() {
            return None;
        }
        if !self.is_ready().await {
            return Some(self.recover(None, reason).await);
        }
        let failed = self.failed_courts().await;
        if failed.is_empty() {
            return None;
        }
        Some(self.recover(Some(failed), reason).await)
    }

    async fn run_strategy(
        self: &Arc<Self>,
        strategy: RecoveryStrategy,
        courts: &[CourtNumber],
    ) -> Result<(Vec<CourtNumber>, Vec<CourtNumber>), String> {
        match strategy {
            RecoveryStrategy::IndividualCourt => {
                let mut recovered = Vec::new();
                let mut failed = Vec::new();
                for &court in courts {
                    if self.recover_court(court).await {
                        recovered.push(court);
                    } else {
                        failed.push(court);
                    }
                }
                Ok((recovered, failed))
            }
            RecoveryStrategy::PartialPool => Ok(self.recover_courts(courts).await),
            RecoveryStrategy::FullRestart => {
                self.restart().await.map_err(|e| e.to_string())?;
                let available = self.get_available_courts().await;
                let failed = self
                    .requested_courts()
                    .iter()
                    .copied()
                    .filter(|court| !available.contains(court))
                    .collect();
                Ok((available, failed))
            }
        }
    }
}
