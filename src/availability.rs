//! Availability module root
//!
//! Read-only view of what each court's calendar currently offers.

pub mod checker;
pub mod day_labels;


// Re-export commonly used items
pub use checker::{AvailabilityChecker, CourtCheck};
pub use day_labels::{availability_from_snapshot, CourtAvailability};
