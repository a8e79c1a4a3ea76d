//! Values exchanged between the booking core and a site adapter.

use serde::{Deserialize, Serialize};

/// What the page shows for a requested date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotLookup {
    /// A clickable button for the time is rendered.
    Ready,
    /// Nothing for the time yet; the page may render it after a reload.
    NotRendered,
    /// The page states the time is taken or that nothing is available.
    Unavailable,
}

/// Raw calendar content read from a court page.
///
/// `times` are the labels of the time buttons in DOM order; `text` is the
/// visible page text used to recognize day headings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarSnapshot {
    pub text: String,
    pub times: Vec<String>,
}

/// Evidence that a booking went through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub url: String,
    pub confirmation_id: Option<String>,
}
