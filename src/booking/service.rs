//! The two entry points offered to user-facing layers: reading availability
//! and attempting a booking. Both return structured values, never errors.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::availability::{AvailabilityChecker, CourtCheck};
use crate::booking::executor::BookingExecutor;
use crate::booking::orchestrator::BookingOrchestrator;
use crate::booking::retry::FormRetryPolicy;
use crate::booking::types::{BookingOutcome, BookingRequest, TimeSlotCandidate};
use crate::browser_pool::pool::BrowserPool;
use crate::configuration::config::Config;
use crate::configuration::types::CourtNumber;

/// How far ahead of a slot the vendor opens it for booking.
pub const BOOKING_WINDOW_HOURS: i64 = 48;

/// Moment the vendor starts accepting bookings for `target`.
pub fn booking_window_opens(target: NaiveDateTime) -> NaiveDateTime {
    target - ChronoDuration::hours(BOOKING_WINDOW_HOURS)
}

pub fn is_within_booking_window(target: NaiveDateTime, now: NaiveDateTime) -> bool {
    now >= booking_window_opens(target) && now < target
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub checked_at: DateTime<Utc>,
    pub courts: BTreeMap<CourtNumber, CourtCheck>,
}

pub struct BookingService {
    pool: Arc<BrowserPool>,
    orchestrator: BookingOrchestrator,
    availability: Arc<AvailabilityChecker>,
}

impl BookingService {
    pub fn new(
        pool: Arc<BrowserPool>,
        orchestrator: BookingOrchestrator,
        availability: Arc<AvailabilityChecker>,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            availability,
        }
    }

    /// Builds the executor, orchestrator and checker from `config`.
    pub fn from_config(pool: Arc<BrowserPool>, config: &Config) -> Self {
        let executor = Arc::new(BookingExecutor::new(pool.clone(), config.executor.clone()));
        let orchestrator = BookingOrchestrator::new(
            executor,
            config.orchestrator.clone(),
            FormRetryPolicy::from(&config.executor.form_retry),
        );
        let availability = Arc::new(AvailabilityChecker::new(
            pool.clone(),
            config.site.day_labels.clone(),
            &config.orchestrator,
        ));
        Self::new(pool, orchestrator, availability)
    }

    pub fn pool(&self) -> &Arc<BrowserPool> {
        &self.pool
    }

    /// Entry point: what the given courts show right now. An empty list
    /// means every court with a live session.
    pub async fn check_availability(&self, courts: &[CourtNumber]) -> AvailabilityReport {
        let courts = if courts.is_empty() {
            self.pool.get_available_courts().await
        } else {
            courts.to_vec()
        };
        AvailabilityReport {
            checked_at: Utc::now(),
            courts: self.availability.check_courts(&courts).await,
        }
    }

    /// Entry point: books the request on the first candidate court that accepts it.
    pub async fn attempt_booking(&self, request: &BookingRequest) -> BookingOutcome {
        self.prepare_courts(&request.unique_courts()).await;
        self.orchestrator.book(request).await
    }

    /// Health gate run before a booking. A pool with no live session is
    /// restarted first. Failed candidate courts are recovered; the booking
    /// waits for that only when no other candidate is up, otherwise the
    /// recovery runs in the background while the race starts.
    pub async fn prepare_courts(&self, candidates: &[CourtNumber]) {
        if !self.pool.is_ready().await {
            warn!("Browser pool not ready before booking, recovering it");
            let result = self.pool.recover(None, "pool not ready before booking").await;
            info!("Pre-booking recovery: {}", result.message);
            return;
        }

        let failed: Vec<CourtNumber> = self
            .pool
            .failed_courts()
            .await
            .into_iter()
            .filter(|court| candidates.contains(court))
            .collect();
        if failed.is_empty() {
            return;
        }
        let available = self.pool.get_available_courts().await;
        let any_up = candidates
            .iter()
            .any(|court| available.contains(court) && !failed.contains(court));

        if any_up {
            info!("Recovering courts {:?} in the background", failed);
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.recover(Some(failed), "candidate courts failed before booking").await;
            });
        } else {
            warn!("No candidate court is up, recovering {:?} before booking", failed);
            let result = self
                .pool
                .recover(Some(failed), "candidate courts failed before booking")
                .await;
            info!("Pre-booking recovery: {}", result.message);
        }
    }

    /// Courts with a live session currently showing `time` on `date`.
    pub async fn candidates_for(&self, date: NaiveDate, time: NaiveTime) -> Vec<CourtNumber> {
        let report = self.check_availability(&[]).await;
        report
            .courts
            .iter()
            .filter(|(_, check)| check.availability().is_some_and(|a| a.offers(date, time)))
            .map(|(court, _)| *court)
            .collect()
    }

    /// Earliest dated slot in `[earliest, latest]` across `courts`. Ties on
    /// time go to the lowest court number.
    pub async fn next_available_slot(
        &self,
        courts: &[CourtNumber],
        earliest: NaiveDateTime,
        latest: NaiveDateTime,
    ) -> Option<TimeSlotCandidate> {
        let report = self.check_availability(courts).await;
        report
            .courts
            .iter()
            .filter_map(|(court, check)| check.availability().map(|a| (*court, a)))
            .flat_map(|(court, availability)| {
                availability
                    .dated_slots()
                    .into_iter()
                    .filter_map(move |(date, time)| {
                        let at = NaiveTime::parse_from_str(time.trim(), "%H:%M").ok()?;
                        Some((date.and_time(at), TimeSlotCandidate { court, date, time }))
                    })
            })
            .filter(|(at, _)| *at >= earliest && *at <= latest)
            .min_by(|(a, ca), (b, cb)| a.cmp(b).then(ca.court.cmp(&cb.court)))
            .map(|(_, candidate)| candidate)
    }

    pub async fn is_slot_available(
        &self,
        court: CourtNumber,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, String> {
        self.availability.is_slot_available(court, date, time).await
    }
}
