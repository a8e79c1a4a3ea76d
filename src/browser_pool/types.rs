//! Reporting types of the browser pool.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::configuration::types::CourtNumber;

/// Lifetime counters, kept under the pool lock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolCounters {
    /// Sessions created successfully, including recreations.
    pub sessions_created: u64,
    pub sessions_recreated: u64,
    /// Creations that failed after exhausting their retries.
    pub failed_creations: u64,
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    pub recovery_attempts: u64,
    pub recovery_successes: u64,
    pub pool_restarts: u64,
}

/// Snapshot of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct CourtDetail {
    pub court: CourtNumber,
    pub is_healthy: bool,
    pub is_positioned: bool,
    pub in_use: bool,
    pub use_count: u64,
    pub age_secs: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub ready: bool,
    pub fully_ready: bool,
    pub partially_ready: bool,
    pub critical_operation_in_progress: bool,
    pub requested_courts: Vec<CourtNumber>,
    pub available_courts: Vec<CourtNumber>,
    pub counters: PoolCounters,
    pub courts: Vec<CourtDetail>,
    /// Latest recovery attempts, oldest first.
    pub recent_recoveries: Vec<RecoveryAttempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Failed,
}

impl HealthStatus {
    /// Grades a court from the number of checks it passed out of four.
    pub fn from_checks(passed: usize) -> Self {
        match passed {
            4.. => HealthStatus::Healthy,
            3 => HealthStatus::Degraded,
            1 | 2 => HealthStatus::Critical,
            _ => HealthStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub status: HealthStatus,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

/// Result of the four checks run against one court page.
#[derive(Debug, Clone, Serialize)]
pub struct CourtHealth {
    pub court: CourtNumber,
    pub status: HealthStatus,
    pub page_accessible: bool,
    pub calendar_readable: bool,
    pub session_healthy: bool,
    pub positioned: bool,
    pub url: Option<String>,
    pub error: Option<String>,
    pub response_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshReport {
    pub refreshed: Vec<CourtNumber>,
    pub repositioned: Vec<CourtNumber>,
    pub failed: Vec<CourtNumber>,
    /// Busy sessions, or every session while a booking is in flight.
    pub skipped: Vec<CourtNumber>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Whether a booking was in flight when `stop` was called.
    pub waited_for_critical: bool,
    /// The bounded wait ran out before the booking finished.
    pub critical_wait_timed_out: bool,
    pub sessions_closed: usize,
    /// Teardown errors that were logged and ignored.
    pub errors_swallowed: usize,
}

/// Recovery strategies, from least to most disruptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Recreate the session of a single court.
    IndividualCourt,
    /// Recreate every failing court, staggered.
    PartialPool,
    /// Close everything and start the pool again.
    FullRestart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    pub strategy: RecoveryStrategy,
    pub at: DateTime<Utc>,
    pub courts_affected: Vec<CourtNumber>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    /// Strategy that succeeded, or the last one tried.
    pub strategy_used: Option<RecoveryStrategy>,
    pub courts_recovered: Vec<CourtNumber>,
    pub courts_failed: Vec<CourtNumber>,
    pub message: String,
    pub attempts: Vec<RecoveryAttempt>,
    pub duration_ms: u64,
}
