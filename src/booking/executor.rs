//! Single-court booking attempt.
//!
//! One run walks `Idle -> ValidatingSession -> LocatingSlot -> SubmittingForm
//! -> AwaitingConfirmation` and ends in `Success`, `Failed` or `TimedOut`.
//! Every step has its own budget and the whole run is capped by the total
//! execution budget. Errors never escape: they become a failed
//! [`ExecutionResult`].
//!
//! Cancellation is structural. Dropping the future returned by
//! [`BookingExecutor::execute`] (for instance by aborting its task) stops the
//! attempt at its current await point; the critical-operation guard and the
//! session lease are released by their `Drop` impls, and a session left off
//! its calendar is marked for repositioning. Runs that finish hand a page
//! left off its calendar to a background reset.

use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::booking::hooks::{LoggingHook, StepHook};
use crate::booking::retry::RetryPolicy;
use crate::booking::types::*;
use crate::browser_pool::court_session::SessionLease;
use crate::browser_pool::pool::BrowserPool;
use crate::configuration::types::{CourtNumber, ExecutorConfig};
use crate::error_handling::types::{BookingError, SiteError};
use crate::site::types::{Confirmation, SlotLookup};

const CONFIRMATION_POLL: Duration = Duration::from_millis(250);

/// Records state transitions and their timings for one run.
struct StepTracker<'a> {
    court: CourtNumber,
    hook: &'a dyn StepHook,
    started: Instant,
    state: ExecutorState,
    entered: Instant,
    timings: Vec<StepTiming>,
}

impl<'a> StepTracker<'a> {
    fn new(court: CourtNumber, hook: &'a dyn StepHook) -> Self {
        let now = Instant::now();
        Self {
            court,
            hook,
            started: now,
            state: ExecutorState::Idle,
            entered: now,
            timings: Vec::new(),
        }
    }

    fn enter(&mut self, state: ExecutorState) {
        let now = Instant::now();
        self.timings.push(StepTiming {
            state: self.state,
            elapsed_ms: (now - self.entered).as_millis() as u64,
        });
        self.state = state;
        self.entered = now;
        self.hook.on_transition(self.court, state, now - self.started);
    }
}

pub struct BookingExecutor {
    pool: Arc<BrowserPool>,
    config: ExecutorConfig,
    slot_retry: RetryPolicy,
    hook: Arc<dyn StepHook>,
}

impl BookingExecutor {
    pub fn new(pool: Arc<BrowserPool>, config: ExecutorConfig) -> Self {
        let slot_retry = RetryPolicy::from(&config.slot_retry);
        Self {
            pool,
            config,
            slot_retry,
            hook: Arc::new(LoggingHook),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn StepHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_slot_retry(mut self, policy: RetryPolicy) -> Self {
        self.slot_retry = policy;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BrowserPool> {
        &self.pool
    }

    /// Runs one booking attempt for `request` on `court`.
    pub async fn execute(&self, court: CourtNumber, request: &BookingRequest) -> ExecutionResult {
        let _critical = self.pool.begin_critical_operation();
        let mut tracker = StepTracker::new(court, self.hook.as_ref());
        let mut lease: Option<SessionLease> = None;
        let total = self.config.total_execution();

        info!(
            "Court {}: booking {} {} for {} {}",
            court,
            request.target_date,
            request.time_label(),
            request.user.first_name,
            request.user.last_name
        );

        let run = tokio::time::timeout(total, self.run_steps(&mut tracker, &mut lease, request)).await;
        let (final_state, outcome) = match run {
            Ok(Ok(confirmation)) => (
                ExecutorState::Success,
                ExecutionOutcome::Booked {
                    confirmation_id: confirmation.confirmation_id,
                    confirmation_url: confirmation.url,
                },
            ),
            Ok(Err(e)) => (
                ExecutorState::Failed,
                ExecutionOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            ),
            Err(_) => {
                let e = BookingError::Timeout("booking", total);
                (
                    ExecutorState::TimedOut,
                    ExecutionOutcome::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                )
            }
        };
        tracker.enter(final_state);

        if let Some(lease) = lease.take().filter(|l| l.is_dirty()) {
            reset_in_background(lease, self.config.reset());
        }

        let result = ExecutionResult {
            court,
            outcome,
            final_state,
            total_ms: tracker.started.elapsed().as_millis() as u64,
            timings: tracker.timings,
        };
        match &result.outcome {
            ExecutionOutcome::Booked { .. } => info!("{}", result.summary()),
            ExecutionOutcome::Failed { .. } => warn!("{}", result.summary()),
        }
        result
    }

    async fn run_steps(
        &self,
        tracker: &mut StepTracker<'_>,
        lease_slot: &mut Option<SessionLease>,
        request: &BookingRequest,
    ) -> Result<Confirmation, BookingError> {
        let court = tracker.court;

        tracker.enter(ExecutorState::ValidatingSession);
        let lease = lease_slot.insert(self.acquire(court).await?);

        tracker.enter(ExecutorState::LocatingSlot);
        // the lookup may already leave the calendar for the day's slot page
        lease.mark_dirty();
        self.locate_slot(lease, request).await?;
        let budget = self.config.navigation();
        step("opening slot", budget, lease.page().open_slot(request.target_date, request.target_time))
            .await?
            .map_err(|e| site_failure(e, BookingError::FormSubmissionFailed))?;

        tracker.enter(ExecutorState::SubmittingForm);
        let page = lease.page().clone();
        let user = &request.user;
        step("form filling", self.config.form_filling(), async {
            page.fill_form(user).await?;
            page.submit_form().await
        })
        .await?
        .map_err(|e| site_failure(e, BookingError::FormSubmissionFailed))?;

        tracker.enter(ExecutorState::AwaitingConfirmation);
        step("confirmation", self.config.confirmation(), async {
            loop {
                if let Some(confirmation) = page.confirmation().await? {
                    return Ok::<Confirmation, SiteError>(confirmation);
                }
                tokio::time::sleep(CONFIRMATION_POLL).await;
            }
        })
        .await?
        .map_err(|e| site_failure(e, BookingError::Unexpected))
    }

    /// Gets the court session, waits for exclusive use and makes sure the
    /// page is on its calendar.
    async fn acquire(&self, court: CourtNumber) -> Result<SessionLease, BookingError> {
        // liveness check, plus a recreation when it fails
        let budget = self.config.health_check() + self.config.navigation();
        let session = step("session check", budget, self.pool.get_session(court))
            .await?
            .ok_or_else(|| {
                BookingError::SessionUnavailable(format!("no live session for court {}", court))
            })?;

        let mut lease = step("session lease", self.config.navigation(), session.lease()).await?;
        let budget = self.config.navigation();
        lease.ensure_positioned(budget).await.map_err(|e| {
            BookingError::SessionUnavailable(format!("court {} calendar unavailable: {}", court, e))
        })?;
        Ok(lease)
    }

    /// Looks for the slot, reloading between attempts while it is not
    /// rendered. A slot that never shows up counts as unavailable.
    async fn locate_slot(&self, lease: &SessionLease, request: &BookingRequest) -> Result<(), BookingError> {
        let page = lease.page();
        let time = request.time_label();
        let element_wait = self.config.element_wait();
        let navigation = self.config.navigation();

        let located = self
            .slot_retry
            .run(
                |attempt| {
                    let time = time.clone();
                    async move {
                        if attempt > 0 {
                            debug!("Court {}: reloading to look for {} again", lease.court(), time);
                            step("reload", navigation, page.reload())
                                .await?
                                .map_err(|e| site_failure(e, BookingError::Unexpected))?;
                        }
                        let lookup = step(
                            "slot lookup",
                            element_wait,
                            page.find_slot(request.target_date, request.target_time),
                        )
                        .await?
                        .map_err(|e| site_failure(e, BookingError::Unexpected))?;
                        match lookup {
                            SlotLookup::Ready => Ok(()),
                            SlotLookup::NotRendered => Err(BookingError::SlotNotYetRendered(time)),
                            SlotLookup::Unavailable => Err(BookingError::SlotUnavailable(format!(
                                "{} on {} is not available",
                                time, request.target_date
                            ))),
                        }
                    }
                },
                |e| matches!(e, BookingError::SlotNotYetRendered(_)),
            )
            .await;

        match located {
            Err(BookingError::SlotNotYetRendered(time)) => Err(BookingError::SlotUnavailable(format!(
                "{} did not appear after {} attempts",
                time,
                self.slot_retry.max_attempts()
            ))),
            other => other,
        }
    }
}

/// Runs `fut` within `budget`, naming the stage on timeout.
async fn step<T>(stage: &'static str, budget: Duration, fut: impl Future<Output = T>) -> Result<T, BookingError> {
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| BookingError::Timeout(stage, budget))
}

/// Puts the page back on its calendar without delaying the result. The
/// lease moves into the task so nobody drives the page meanwhile.
fn reset_in_background(mut lease: SessionLease, budget: Duration) {
    tokio::spawn(async move {
        if let Err(e) = lease.ensure_positioned(budget).await {
            debug!("Court {}: reset after booking failed: {}", lease.court(), e);
        }
    });
}

/// A disconnected page means the session is gone; anything else is the
/// failure class of the step that hit it.
fn site_failure(e: SiteError, classify: fn(String) -> BookingError) -> BookingError {
    if e.is_disconnect() {
        BookingError::SessionUnavailable(e.to_string())
    } else {
        classify(e.to_string())
    }
}
