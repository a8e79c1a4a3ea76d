//! Booking module root
//!
//! A [`executor::BookingExecutor`] runs one attempt on one court; the
//! [`orchestrator::BookingOrchestrator`] races executors across candidate
//! courts; [`service::BookingService`] is what outer layers call.

pub mod executor;
pub mod hooks;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export commonly used items
pub use executor::BookingExecutor;
pub use hooks::{LoggingHook, StepHook, StepRecorder};
pub use orchestrator::BookingOrchestrator;
pub use retry::{FormRetryPolicy, RetryPolicy};
pub use service::{booking_window_opens, AvailabilityReport, BookingService};
pub use types::*;
