use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::configuration::types::CourtNumber;
use crate::error_handling::types::FailureKind;

/// Contact details typed into the booking form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// Where a booking request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    /// Requested by a user for a slot that is already bookable.
    #[default]
    Immediate,
    /// Fired by the external queue when the booking window opens.
    Queued,
    /// Re-submission of an earlier failed request.
    Retry,
}

/// `NaiveTime` written as "HH:MM" on the wire.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

/// One user action: book `target_time` on `target_date` on the first of the
/// candidate courts that accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRequest {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(default)]
    pub source: BookingSource,
    pub user: UserInfo,
    pub target_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub target_time: NaiveTime,
    /// Preference order; duplicates are ignored.
    pub candidate_courts: Vec<CourtNumber>,
}

impl BookingRequest {
    pub fn new(
        user: UserInfo,
        target_date: NaiveDate,
        target_time: NaiveTime,
        candidate_courts: Vec<CourtNumber>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            source: BookingSource::Immediate,
            user,
            target_date,
            target_time,
            candidate_courts,
        }
    }

    pub fn with_source(mut self, source: BookingSource) -> Self {
        self.source = source;
        self
    }

    pub fn target_datetime(&self) -> NaiveDateTime {
        self.target_date.and_time(self.target_time)
    }

    pub fn time_label(&self) -> String {
        self.target_time.format("%H:%M").to_string()
    }

    /// Candidate courts in preference order without repeats.
    pub fn unique_courts(&self) -> Vec<CourtNumber> {
        let mut seen = Vec::with_capacity(self.candidate_courts.len());
        for court in &self.candidate_courts {
            if !seen.contains(court) {
                seen.push(*court);
            }
        }
        seen
    }
}

/// A slot seen as open on a court's calendar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSlotCandidate {
    pub court: CourtNumber,
    pub date: NaiveDate,
    pub time: String,
}

/// States of a single booking attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    ValidatingSession,
    LocatingSlot,
    SubmittingForm,
    AwaitingConfirmation,
    Success,
    Failed,
    TimedOut,
}

impl ExecutorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorState::Success | ExecutorState::Failed | ExecutorState::TimedOut
        )
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::ValidatingSession => "validating session",
            ExecutorState::LocatingSlot => "locating slot",
            ExecutorState::SubmittingForm => "submitting form",
            ExecutorState::AwaitingConfirmation => "awaiting confirmation",
            ExecutorState::Success => "success",
            ExecutorState::Failed => "failed",
            ExecutorState::TimedOut => "timed out",
        };
        write!(f, "{}", name)
    }
}

/// Time spent in one non-terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub state: ExecutorState,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Booked {
        confirmation_id: Option<String>,
        confirmation_url: String,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// What one executor run on one court produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub court: CourtNumber,
    pub outcome: ExecutionOutcome,
    pub final_state: ExecutorState,
    pub timings: Vec<StepTiming>,
    pub total_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Booked { .. })
    }

    pub fn confirmation_id(&self) -> Option<&str> {
        match &self.outcome {
            ExecutionOutcome::Booked {
                confirmation_id, ..
            } => confirmation_id.as_deref(),
            ExecutionOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            ExecutionOutcome::Failed { kind, .. } => Some(*kind),
            ExecutionOutcome::Booked { .. } => None,
        }
    }

    /// Human readable one-liner for logs and chat replies.
    pub fn summary(&self) -> String {
        match &self.outcome {
            ExecutionOutcome::Booked {
                confirmation_id, ..
            } => format!(
                "court {} booked (confirmation {})",
                self.court,
                confirmation_id.as_deref().unwrap_or("unknown")
            ),
            ExecutionOutcome::Failed { kind, message } => {
                format!("court {} {}: {}", self.court, kind, message)
            }
        }
    }
}

/// Fate of one court's task inside an orchestrated booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum CourtReport {
    Completed { result: ExecutionResult },
    /// Aborted because another court won or the deadline passed.
    Cancelled,
    Panicked { message: String },
}

impl CourtReport {
    pub fn reason(&self) -> String {
        match self {
            CourtReport::Completed { result } => result.summary(),
            CourtReport::Cancelled => "cancelled".to_string(),
            CourtReport::Panicked { message } => format!("executor panicked: {}", message),
        }
    }
}

/// Reduction of all per-court attempts for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub request_id: Uuid,
    pub winner: Option<ExecutionResult>,
    pub reports: BTreeMap<CourtNumber, CourtReport>,
    pub elapsed_ms: u64,
}

impl BookingOutcome {
    pub fn is_success(&self) -> bool {
        self.winner.is_some()
    }

    pub fn court(&self) -> Option<CourtNumber> {
        self.winner.as_ref().map(|w| w.court)
    }

    pub fn confirmation_id(&self) -> Option<&str> {
        self.winner.as_ref().and_then(|w| w.confirmation_id())
    }

    pub fn message(&self) -> String {
        if let Some(winner) = &self.winner {
            return format!("Booking confirmed: {}", winner.summary());
        }
        if self.reports.is_empty() {
            return "Booking failed: no candidate courts".to_string();
        }
        let reasons: Vec<String> = self
            .reports
            .values()
            .map(|report| report.reason())
            .collect();
        format!("Booking failed on every court: {}", reasons.join("; "))
    }
}
