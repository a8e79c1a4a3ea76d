use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::day_labels::{availability_from_snapshot, CourtAvailability};
use crate::browser_pool::pool::BrowserPool;
use crate::configuration::types::{CourtNumber, DayLabel, OrchestratorConfig};

/// Result of reading one court.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CourtCheck {
    Ok { availability: CourtAvailability },
    Error { message: String },
}

impl CourtCheck {
    pub fn availability(&self) -> Option<&CourtAvailability> {
        match self {
            CourtCheck::Ok { availability } => Some(availability),
            CourtCheck::Error { .. } => None,
        }
    }
}

/// Reads the calendars of the pool's sessions without booking anything.
///
/// Reads never take a session away from a booking and never navigate: a
/// court whose page is being driven, or that is off its calendar, reports an
/// error instead.
pub struct AvailabilityChecker {
    pool: Arc<BrowserPool>,
    labels: Vec<DayLabel>,
    max_concurrent: usize,
    per_court_timeout: Duration,
    clock: fn() -> NaiveDateTime,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl AvailabilityChecker {
    pub fn new(pool: Arc<BrowserPool>, labels: Vec<DayLabel>, config: &OrchestratorConfig) -> Self {
        Self {
            pool,
            labels,
            max_concurrent: config.max_concurrent.max(1),
            per_court_timeout: config.availability_timeout(),
            clock: local_now,
        }
    }

    /// Replaces the wall clock used to resolve "today".
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub async fn check_court(&self, court: CourtNumber) -> Result<CourtAvailability, String> {
        match tokio::time::timeout(self.per_court_timeout, self.read_court(court)).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "reading court {} took longer than {}ms",
                court,
                self.per_court_timeout.as_millis()
            )),
        }
    }

    async fn read_court(&self, court: CourtNumber) -> Result<CourtAvailability, String> {
        let session = self
            .pool
            .get_session(court)
            .await
            .ok_or_else(|| format!("no live session for court {}", court))?;
        let lease = session
            .try_lease()
            .ok_or_else(|| format!("court {} is busy with a booking", court))?;
        // repositioning is left to maintenance
        if !session.is_positioned() {
            return Err(format!("court {} is not on its calendar", court));
        }
        let snapshot = lease.page().read_calendar().await.map_err(|e| e.to_string())?;
        debug!("Court {}: {} time buttons read", court, snapshot.times.len());
        Ok(availability_from_snapshot(&snapshot, &self.labels, (self.clock)()))
    }

    /// Reads `courts` in parallel, at most `max_concurrent` at a time.
    pub async fn check_courts(self: &Arc<Self>, courts: &[CourtNumber]) -> BTreeMap<CourtNumber, CourtCheck> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut reads = JoinSet::new();
        for &court in courts {
            let checker = self.clone();
            let semaphore = semaphore.clone();
            reads.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (court, Err("availability check aborted".to_string()));
                };
                (court, checker.check_court(court).await)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((court, Ok(availability))) => {
                    results.insert(court, CourtCheck::Ok { availability });
                }
                Ok((court, Err(message))) => {
                    warn!("Availability of court {} unknown: {}", court, message);
                    results.insert(court, CourtCheck::Error { message });
                }
                Err(e) => warn!("Availability task failed: {}", e),
            }
        }
        for &court in courts {
            results.entry(court).or_insert_with(|| CourtCheck::Error {
                message: "availability check did not finish".to_string(),
            });
        }
        info!(
            "Availability checked for {} courts ({} readable)",
            results.len(),
            results.values().filter(|c| c.availability().is_some()).count()
        );
        results
    }

    pub async fn is_slot_available(
        &self,
        court: CourtNumber,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, String> {
        Ok(self.check_court(court).await?.offers(date, time))
    }
}
