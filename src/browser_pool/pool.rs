use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::booking::retry::RetryPolicy;
use crate::browser_pool::court_session::CourtSession;
use crate::browser_pool::critical::{CriticalOperationGuard, CriticalOperations};
use crate::browser_pool::types::*;
use crate::configuration::types::{CourtNumber, PoolConfig};
use crate::error_handling::types::{PoolError, SiteError};
use crate::site::site_trait::{BrowserEngine, CourtPage};

/// Recovery attempts kept for `stats()`.
const RECOVERY_HISTORY: usize = 50;

#[derive(Default)]
struct PoolState {
    started: bool,
    stopped: bool,
    sessions: BTreeMap<CourtNumber, Arc<CourtSession>>,
    counters: PoolCounters,
    recoveries: VecDeque<RecoveryAttempt>,
}

/// Keeps one warm browser session per court.
///
/// # Fields Overview
///
/// - `engine`: the site adapter that launches browsers and opens pages
/// - `courts`: requested courts, in launch order
/// - `state`: session map and counters, the only mutable state, behind one lock
/// - `replacing`: one lock per court, held while its session is replaced so
///   callers wait for the new session instead of creating another one
/// - `critical`: booking-in-flight tracking that pauses maintenance
/// - `recovery`: serializes recovery passes
/// - `shutdown`: flipped by `stop()` so background tasks can exit
pub struct BrowserPool {
    engine: Arc<dyn BrowserEngine>,
    courts: Vec<CourtNumber>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    replacing: BTreeMap<CourtNumber, Mutex<()>>,
    critical: CriticalOperations,
    pub(crate) recovery: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl BrowserPool {
    pub fn new(engine: Arc<dyn BrowserEngine>, courts: Vec<CourtNumber>, config: PoolConfig) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        let replacing = courts.iter().map(|court| (*court, Mutex::new(()))).collect();
        Self {
            engine,
            courts,
            config,
            state: Mutex::new(PoolState::default()),
            replacing,
            critical: CriticalOperations::new(),
            recovery: Mutex::new(()),
            shutdown,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn requested_courts(&self) -> &[CourtNumber] {
        &self.courts
    }

    /// Launches the engine and creates one session per court.
    ///
    /// Courts are started in parallel, the i-th one after `i * stagger`.
    /// Courts that still fail after their retries are left out; the pool is
    /// then partially ready. Fails only when no court came up at all.
    pub async fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        {
            let state = self.state.lock().await;
            if state.stopped {
                return Err(PoolError::Stopped);
            }
            if state.started {
                return Err(PoolError::AlreadyStarted);
            }
        }

        info!("Starting browser pool for courts {:?}", self.courts);
        self.engine.launch().await.map_err(PoolError::EngineLaunch)?;

        let mut tasks = JoinSet::new();
        for (index, court) in self.courts.iter().copied().enumerate() {
            let pool = self.clone();
            let delay = self.config.stagger() * index as u32;
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                (court, pool.create_session_with_retry(court).await)
            });
        }

        let mut created = BTreeMap::new();
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((court, Ok(session))) => {
                    info!("Court {} session ready", court);
                    created.insert(court, session);
                }
                Ok((court, Err(e))) => {
                    error!("Court {} failed to initialize: {}", court, e);
                    failed += 1;
                }
                Err(e) => {
                    error!("Court initialization task failed: {}", e);
                    failed += 1;
                }
            }
        }

        if created.is_empty() {
            error!("All court initializations failed, shutting the engine down");
            if let Err(e) = self.shutdown_engine().await {
                debug!("Engine shutdown after failed start: {}", e);
            }
            let mut state = self.state.lock().await;
            state.counters.failed_creations += failed as u64;
            return Err(PoolError::NoCourtsReady(failed, self.courts.len()));
        }

        let mut state = self.state.lock().await;
        if state.stopped {
            drop(state);
            for (court, session) in created {
                if let Err(e) = self.close_page(court, session.page()).await {
                    debug!("Closing court {} created after stop: {}", court, e);
                }
            }
            return Err(PoolError::Stopped);
        }
        state.counters.sessions_created += created.len() as u64;
        state.counters.failed_creations += failed as u64;
        state.sessions = created;
        state.started = true;

        if state.sessions.len() < self.courts.len() {
            warn!(
                "Browser pool partially ready: {}/{} courts ({:?})",
                state.sessions.len(),
                self.courts.len(),
                state.sessions.keys().collect::<Vec<_>>()
            );
        } else {
            info!("Browser pool ready with {} courts", state.sessions.len());
        }
        Ok(())
    }

    /// Opens a page for `court`, moves it to the calendar and lets it settle.
    async fn create_session(&self, court: CourtNumber) -> Result<Arc<CourtSession>, SiteError> {
        let budget = self.config.navigation_timeout();
        let open = async {
            let page: Arc<dyn CourtPage> = Arc::from(self.engine.open_page(court).await?);
            if let Err(e) = page.navigate_home().await {
                if let Err(close_err) = self.close_page(court, &page).await {
                    debug!("Closing half-open page for court {}: {}", court, close_err);
                }
                return Err(e);
            }
            Ok(page)
        };
        let page = tokio::time::timeout(budget, open).await.map_err(|_| {
            SiteError::NavigationFailed(format!(
                "court {} did not open within {}ms",
                court,
                budget.as_millis()
            ))
        })??;

        tokio::time::sleep(self.config.warmup()).await;
        Ok(Arc::new(CourtSession::new(court, page)))
    }

    async fn create_session_with_retry(
        &self,
        court: CourtNumber,
    ) -> Result<Arc<CourtSession>, SiteError> {
        let policy = RetryPolicy::from(&self.config.create_retry);
        policy
            .run(
                |attempt| {
                    if attempt > 0 {
                        warn!(
                            "Retrying session creation for court {} ({}/{})",
                            court,
                            attempt + 1,
                            policy.max_attempts()
                        );
                    }
                    self.create_session(court)
                },
                |_| true,
            )
            .await
    }

    /// Returns the live session of `court`, or `None` when the court has no
    /// session. A session that fails its liveness check is recreated first.
    /// Sessions currently leased are returned without probing. While the
    /// court is being replaced (recycling, recovery) this waits for the new
    /// session.
    pub async fn get_session(&self, court: CourtNumber) -> Option<Arc<CourtSession>> {
        let _replacing = self.replacing.get(&court)?.lock().await;
        let existing = self.current_session(court).await?;

        if existing.is_leased() || existing.is_alive(self.config.liveness_timeout()).await {
            return Some(existing);
        }

        warn!("Court {} failed its liveness check, recreating", court);
        self.replace_session(court, Some(existing)).await
    }

    /// Closes and recreates the session of one court, also for courts that
    /// failed at start. Returns whether the court has a session afterwards.
    /// A session in use by a booking is left alone and counts as alive.
    pub async fn recover_court(&self, court: CourtNumber) -> bool {
        let Some(replacing) = self.replacing.get(&court) else {
            warn!("Court {} is not part of this pool", court);
            return false;
        };
        let _replacing = replacing.lock().await;
        if self.state.lock().await.stopped {
            return false;
        }
        let current = self.current_session(court).await;
        let _lease = match &current {
            Some(session) => match session.try_lease() {
                Some(lease) => Some(lease),
                None => {
                    debug!("Court {} is in use, not recovering it", court);
                    return true;
                }
            },
            None => None,
        };
        info!("Recovering court {}", court);
        self.replace_session(court, current).await.is_some()
    }

    async fn current_session(&self, court: CourtNumber) -> Option<Arc<CourtSession>> {
        let state = self.state.lock().await;
        if state.stopped {
            return None;
        }
        state.sessions.get(&court).cloned()
    }

    /// Swaps `old` for a fresh session. Callers hold the court's
    /// `replacing` lock.
    async fn replace_session(
        &self,
        court: CourtNumber,
        old: Option<Arc<CourtSession>>,
    ) -> Option<Arc<CourtSession>> {
        if let Some(old) = &old {
            old.set_healthy(false);
            if let Err(e) = self.close_page(court, old.page()).await {
                debug!("Closing stale session of court {}: {}", court, e);
            }
        }

        let created = self.create_session_with_retry(court).await;

        let mut state = self.state.lock().await;
        let current = state.sessions.get(&court).cloned();
        // a restart or stop may have swapped the map meanwhile
        let unchanged = match (&current, &old) {
            (Some(current), Some(old)) => Arc::ptr_eq(current, old),
            (None, None) => true,
            _ => false,
        };

        match created {
            Ok(session) if unchanged && !state.stopped => {
                state.counters.sessions_created += 1;
                if old.is_some() {
                    state.counters.sessions_recreated += 1;
                }
                state.sessions.insert(court, session.clone());
                info!("Court {} session recreated", court);
                Some(session)
            }
            Ok(session) => {
                drop(state);
                debug!("Court {} changed during recreation, discarding new session", court);
                if let Err(e) = self.close_page(court, session.page()).await {
                    debug!("Closing surplus session of court {}: {}", court, e);
                }
                current
            }
            Err(e) => {
                error!("Court {} could not be recreated: {}", court, e);
                state.counters.failed_creations += 1;
                if unchanged {
                    state.sessions.remove(&court);
                }
                None
            }
        }
    }

    /// Closes a page within the navigation budget.
    async fn close_page(&self, court: CourtNumber, page: &Arc<dyn CourtPage>) -> Result<(), SiteError> {
        let limit = self.config.navigation_timeout();
        match tokio::time::timeout(limit, page.close()).await {
            Ok(result) => result,
            Err(_) => Err(SiteError::TimedOut(format!(
                "closing court {} took longer than {}ms",
                court,
                limit.as_millis()
            ))),
        }
    }

    async fn shutdown_engine(&self) -> Result<(), SiteError> {
        let limit = self.config.navigation_timeout();
        match tokio::time::timeout(limit, self.engine.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(SiteError::TimedOut(format!(
                "engine shutdown took longer than {}ms",
                limit.as_millis()
            ))),
        }
    }

    pub async fn is_ready(&self) -> bool {
        let state = self.state.lock().await;
        state.started && !state.stopped && !state.sessions.is_empty()
    }

    pub async fn is_fully_ready(&self) -> bool {
        let state = self.state.lock().await;
        state.started && !state.stopped && state.sessions.len() == self.courts.len()
    }

    pub async fn is_partially_ready(&self) -> bool {
        let state = self.state.lock().await;
        state.started
            && !state.stopped
            && !state.sessions.is_empty()
            && state.sessions.len() < self.courts.len()
    }

    pub async fn get_available_courts(&self) -> Vec<CourtNumber> {
        let state = self.state.lock().await;
        if state.stopped {
            return Vec::new();
        }
        state.sessions.keys().copied().collect()
    }

    /// Polls readiness until `limit` elapses.
    pub async fn wait_until_ready(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.is_ready().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Sets or clears the explicit critical-operation latch.
    pub fn set_critical_operation(&self, in_progress: bool) {
        debug!("Critical operation latch set to {}", in_progress);
        self.critical.set_latch(in_progress);
    }

    /// Opens a critical operation that lasts until the guard is dropped.
    pub fn begin_critical_operation(&self) -> CriticalOperationGuard {
        self.critical.begin()
    }

    pub fn is_critical_operation_in_progress(&self) -> bool {
        self.critical.in_progress()
    }

    /// Reloads every idle session, or navigates it home when it is not on its
    /// calendar. Failures are logged and the session is kept.
    pub async fn refresh_all(&self) -> RefreshReport {
        let sessions = self.snapshot().await;
        let mut report = RefreshReport::default();

        if self.critical.in_progress() {
            info!("Skipping refresh, critical operation in progress");
            report.skipped = sessions.iter().map(|s| s.court()).collect();
            return report;
        }

        let budget = self.config.navigation_timeout();
        for session in sessions {
            let court = session.court();
            if self.critical.in_progress() {
                report.skipped.push(court);
                continue;
            }
            let Some(mut lease) = session.try_lease() else {
                debug!("Court {} busy, skipping refresh", court);
                report.skipped.push(court);
                continue;
            };

            if !session.is_positioned() {
                match lease.ensure_positioned(budget).await {
                    Ok(()) => report.repositioned.push(court),
                    Err(e) => {
                        warn!("Court {} could not be repositioned: {}", court, e);
                        report.failed.push(court);
                    }
                }
                continue;
            }

            match tokio::time::timeout(budget, lease.page().reload()).await {
                Ok(Ok(())) => {
                    debug!("Court {} refreshed", court);
                    report.refreshed.push(court);
                }
                Ok(Err(e)) => {
                    warn!("Court {} refresh failed: {}", court, e);
                    report.failed.push(court);
                }
                Err(_) => {
                    warn!("Court {} refresh timed out", court);
                    report.failed.push(court);
                }
            }
        }

        let mut state = self.state.lock().await;
        state.counters.refresh_successes += (report.refreshed.len() + report.repositioned.len()) as u64;
        state.counters.refresh_failures += report.failed.len() as u64;
        report
    }

    /// Recreates idle sessions past their age or use limits.
    ///
    /// The court's replacement lock and the session lease are held from the
    /// close until the new session is in the map, so a booking that starts
    /// meanwhile waits for the new session. The critical state is checked
    /// again once both are held.
    pub async fn recycle_stale(&self) -> Vec<CourtNumber> {
        if self.critical.in_progress() {
            debug!("Skipping recycling, critical operation in progress");
            return Vec::new();
        }

        let max_age = self.config.max_session_age();
        let max_uses = self.config.max_session_uses;
        let mut recycled = Vec::new();
        for session in self.snapshot().await {
            let stale = session.age() >= max_age || session.use_count() >= max_uses;
            if !stale || session.is_leased() {
                continue;
            }
            let court = session.court();
            let Some(Ok(_replacing)) = self.replacing.get(&court).map(Mutex::try_lock) else {
                continue;
            };
            let Some(_lease) = session.try_lease() else {
                continue;
            };
            if self.critical.in_progress() {
                debug!("Critical operation started, recycling stopped");
                break;
            }
            let still_current = self
                .current_session(court)
                .await
                .is_some_and(|current| Arc::ptr_eq(&current, &session));
            if !still_current {
                continue;
            }
            info!(
                "Recycling court {} (age {}s, {} uses)",
                court,
                session.age().as_secs(),
                session.use_count()
            );
            if self.replace_session(court, Some(session.clone())).await.is_some() {
                recycled.push(court);
            }
        }
        recycled
    }

    /// Requested courts without a session, or whose session was found
    /// unhealthy and is not in use.
    pub async fn failed_courts(&self) -> Vec<CourtNumber> {
        let state = self.state.lock().await;
        self.courts
            .iter()
            .copied()
            .filter(|court| match state.sessions.get(court) {
                None => true,
                Some(session) => !session.is_healthy() && !session.is_leased(),
            })
            .collect()
    }

    /// Recovers `courts` in parallel, staggered like `start`. Returns the
    /// courts that have a session afterwards and those that do not.
    pub async fn recover_courts(self: &Arc<Self>, courts: &[CourtNumber]) -> (Vec<CourtNumber>, Vec<CourtNumber>) {
        let mut tasks = JoinSet::new();
        for (index, court) in courts.iter().copied().enumerate() {
            let pool = self.clone();
            let delay = self.config.stagger() * index as u32;
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                (court, pool.recover_court(court).await)
            });
        }

        let mut recovered = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((court, true)) => recovered.push(court),
                Ok((court, false)) => failed.push(court),
                Err(e) => error!("Court recovery task failed: {}", e),
            }
        }
        let missing: Vec<CourtNumber> = courts
            .iter()
            .copied()
            .filter(|court| !recovered.contains(court) && !failed.contains(court))
            .collect();
        failed.extend(missing);
        recovered.sort_unstable();
        failed.sort_unstable();
        (recovered, failed)
    }

    /// Closes every session and the engine, then starts again. Refused while
    /// a booking is in flight.
    pub async fn restart(self: &Arc<Self>) -> Result<(), PoolError> {
        if self.critical.in_progress() {
            return Err(PoolError::CriticalOperation);
        }
        warn!("Restarting browser pool");

        let mut held = Vec::with_capacity(self.replacing.len());
        for lock in self.replacing.values() {
            held.push(lock.lock().await);
        }

        let sessions = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return Err(PoolError::Stopped);
            }
            state.started = false;
            state.counters.pool_restarts += 1;
            std::mem::take(&mut state.sessions)
        };
        for (court, session) in sessions {
            if let Err(e) = self.close_page(court, session.page()).await {
                debug!("Closing court {} for restart: {}", court, e);
            }
        }
        if let Err(e) = self.shutdown_engine().await {
            debug!("Engine shutdown before restart: {}", e);
        }

        let started = self.start().await;
        drop(held);
        started
    }

    pub(crate) async fn record_recovery(&self, attempt: RecoveryAttempt) {
        let mut state = self.state.lock().await;
        state.counters.recovery_attempts += 1;
        if attempt.success {
            state.counters.recovery_successes += 1;
        }
        if state.recoveries.len() == RECOVERY_HISTORY {
            state.recoveries.pop_front();
        }
        state.recoveries.push_back(attempt);
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let live = state.started && !state.stopped;
        let courts = state
            .sessions
            .values()
            .map(|session| {
                let meta = session.meta();
                CourtDetail {
                    court: session.court(),
                    is_healthy: meta.is_healthy,
                    is_positioned: meta.is_positioned,
                    in_use: session.is_leased(),
                    use_count: meta.use_count,
                    age_secs: session.age().as_secs(),
                    created_at: session.created_at(),
                    last_used: meta.last_used,
                }
            })
            .collect();

        PoolStats {
            ready: live && !state.sessions.is_empty(),
            fully_ready: live && state.sessions.len() == self.courts.len(),
            partially_ready: live
                && !state.sessions.is_empty()
                && state.sessions.len() < self.courts.len(),
            critical_operation_in_progress: self.critical.in_progress(),
            requested_courts: self.courts.clone(),
            available_courts: state.sessions.keys().copied().collect(),
            counters: state.counters.clone(),
            courts,
            recent_recoveries: state.recoveries.iter().cloned().collect(),
        }
    }

    /// Overall pool health: not ready is failed, a booking in flight or a
    /// partial pool is degraded.
    pub async fn health(&self) -> PoolHealth {
        let stats = self.stats().await;
        let (status, message) = if !stats.ready {
            (HealthStatus::Failed, "Browser pool is not ready".to_string())
        } else if stats.critical_operation_in_progress {
            (
                HealthStatus::Degraded,
                "Critical operation in progress - pool is busy".to_string(),
            )
        } else if stats.partially_ready {
            (
                HealthStatus::Degraded,
                format!(
                    "Pool partially initialized: {}/{} courts",
                    stats.available_courts.len(),
                    stats.requested_courts.len()
                ),
            )
        } else {
            (HealthStatus::Healthy, "Browser pool is healthy".to_string())
        };
        PoolHealth {
            status,
            message,
            checked_at: Utc::now(),
        }
    }

    /// Runs the four page checks against one court. Busy sessions are only
    /// graded on their bookkeeping.
    pub async fn court_health(&self, court: CourtNumber) -> CourtHealth {
        let started = Instant::now();
        let session = {
            let state = self.state.lock().await;
            state.sessions.get(&court).cloned()
        };
        let Some(session) = session else {
            return CourtHealth {
                court,
                status: HealthStatus::Failed,
                page_accessible: false,
                calendar_readable: false,
                session_healthy: false,
                positioned: false,
                url: None,
                error: Some("no session".to_string()),
                response_ms: 0,
            };
        };

        let limit = self.config.liveness_timeout();
        let mut error = None;
        let (url, calendar_readable) = match session.try_lease() {
            Some(lease) => {
                let url = match tokio::time::timeout(limit, lease.page().current_url()).await {
                    Ok(Ok(url)) => Some(url),
                    Ok(Err(e)) => {
                        error = Some(e.to_string());
                        None
                    }
                    Err(_) => {
                        error = Some("liveness check timed out".to_string());
                        None
                    }
                };
                let readable = matches!(
                    tokio::time::timeout(limit, lease.page().read_calendar()).await,
                    Ok(Ok(_))
                );
                (url, readable)
            }
            None => (None, true),
        };
        let page_accessible = url.is_some() || session.is_leased();
        session.set_healthy(page_accessible);
        let meta = session.meta();

        let passed = [page_accessible, calendar_readable, meta.is_healthy, meta.is_positioned]
            .iter()
            .filter(|check| **check)
            .count();
        CourtHealth {
            court,
            status: HealthStatus::from_checks(passed),
            page_accessible,
            calendar_readable,
            session_healthy: meta.is_healthy,
            positioned: meta.is_positioned,
            url,
            error,
            response_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Receives `true` once `stop` begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Waits (bounded) for in-flight bookings, then closes every session and
    /// the engine. Teardown errors are logged and swallowed.
    pub async fn stop(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        self.shutdown.send_replace(true);

        if self.critical.in_progress() {
            report.waited_for_critical = true;
            let limit = self.config.shutdown_wait();
            info!(
                "Waiting up to {}s for the critical operation to finish",
                limit.as_secs()
            );
            if !self.critical.wait_until_clear(limit).await {
                warn!("Critical operation still running after {}s, closing anyway", limit.as_secs());
                report.critical_wait_timed_out = true;
            }
        }

        let sessions = {
            let mut state = self.state.lock().await;
            state.stopped = true;
            std::mem::take(&mut state.sessions)
        };

        info!("Closing {} browser sessions", sessions.len());
        for (court, session) in sessions {
            match self.close_page(court, session.page()).await {
                Ok(()) => report.sessions_closed += 1,
                Err(e) if e.is_disconnect() => {
                    debug!("Court {} already disconnected: {}", court, e);
                    report.sessions_closed += 1;
                    report.errors_swallowed += 1;
                }
                Err(e) => {
                    warn!("Error closing court {}: {}", court, e);
                    report.errors_swallowed += 1;
                }
            }
        }

        if let Err(e) = self.shutdown_engine().await {
            debug!("Engine shutdown error ignored: {}", e);
            report.errors_swallowed += 1;
        }
        info!("Browser pool stopped");
        report
    }

    async fn snapshot(&self) -> Vec<Arc<CourtSession>> {
        let state = self.state.lock().await;
        state.sessions.values().cloned().collect()
    }
}
