//! Site adapter traits
//!
//! The pool and the booking core only ever talk to the vendor site through
//! these two traits. `BrowserEngine` owns the underlying browser process(es)
//! and hands out one `CourtPage` per court; `CourtPage` exposes the handful of
//! page-level operations a booking needs.
//!
//! Implementors are responsible for:
//! - Translating the vendor markup into [`SlotLookup`] and [`CalendarSnapshot`]
//! - Reporting dead connections as [`SiteError::Disconnected`]
//! - Never blocking the runtime: every call is a suspension point

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono::NaiveTime;

use crate::booking::types::UserInfo;
use crate::configuration::types::CourtNumber;
use crate::error_handling::types::SiteError;
use crate::site::types::{CalendarSnapshot, Confirmation, SlotLookup};

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Starts the underlying browser engine. Called once by the pool.
    async fn launch(&self) -> Result<(), SiteError>;

    /// Opens a fresh, isolated page for `court`. The page is not navigated yet.
    async fn open_page(&self, court: CourtNumber) -> Result<Box<dyn CourtPage>, SiteError>;

    /// Stops the engine. Pages still open may already be unusable.
    async fn shutdown(&self) -> Result<(), SiteError>;
}

#[async_trait]
pub trait CourtPage: Send + Sync {
    fn court(&self) -> CourtNumber;

    /// Cheap liveness check.
    async fn current_url(&self) -> Result<String, SiteError>;

    /// Goes to the court calendar.
    async fn navigate_home(&self) -> Result<(), SiteError>;

    async fn reload(&self) -> Result<(), SiteError>;

    /// Looks for `time` among the slots of `date` only. May navigate away
    /// from the calendar to the day's own page.
    async fn find_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<SlotLookup, SiteError>;

    /// Clicks the slot and waits for the booking form.
    async fn open_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<(), SiteError>;

    async fn fill_form(&self, user: &UserInfo) -> Result<(), SiteError>;

    async fn submit_form(&self) -> Result<(), SiteError>;

    /// `None` while the page does not show a confirmation.
    async fn confirmation(&self) -> Result<Option<Confirmation>, SiteError>;

    /// Reads the calendar as currently rendered. Must not change page state.
    async fn read_calendar(&self) -> Result<CalendarSnapshot, SiteError>;

    async fn close(&self) -> Result<(), SiteError>;
}
