use chrono::{DateTime, Utc};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::configuration::types::CourtNumber;
use crate::error_handling::types::SiteError;
use crate::site::site_trait::CourtPage;

/// Mutable bookkeeping of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMeta {
    pub is_healthy: bool,
    /// The page shows the court calendar, ready for a booking.
    pub is_positioned: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub use_count: u64,
}

/// A long-lived page bound to one court, owned by the pool.
///
/// Only a [`SessionLease`] may drive the page; the pool hands out
/// `Arc<CourtSession>` so callers can wait for a lease without holding the
/// pool lock.
pub struct CourtSession {
    court: CourtNumber,
    page: Arc<dyn CourtPage>,
    created_at: DateTime<Utc>,
    created: Instant,
    meta: Mutex<SessionMeta>,
    lease: Arc<tokio::sync::Mutex<()>>,
}

impl CourtSession {
    /// Wraps a page that was already navigated to the court calendar.
    pub fn new(court: CourtNumber, page: Arc<dyn CourtPage>) -> Self {
        Self {
            court,
            page,
            created_at: Utc::now(),
            created: Instant::now(),
            meta: Mutex::new(SessionMeta {
                is_healthy: true,
                is_positioned: true,
                last_used: None,
                use_count: 0,
            }),
            lease: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn court(&self) -> CourtNumber {
        self.court
    }

    pub fn page(&self) -> &Arc<dyn CourtPage> {
        &self.page
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn meta(&self) -> SessionMeta {
        self.lock_meta().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.lock_meta().is_healthy
    }

    pub fn is_positioned(&self) -> bool {
        self.lock_meta().is_positioned
    }

    pub fn use_count(&self) -> u64 {
        self.lock_meta().use_count
    }

    /// Whether an executor or maintenance currently drives the page.
    pub fn is_leased(&self) -> bool {
        self.lease.try_lock().is_err()
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.lock_meta().is_healthy = healthy;
    }

    pub(crate) fn set_positioned(&self, positioned: bool) {
        self.lock_meta().is_positioned = positioned;
    }

    /// Cheap liveness check: reads the current URL within `limit`.
    pub async fn is_alive(&self, limit: Duration) -> bool {
        let healthy = matches!(
            tokio::time::timeout(limit, self.page.current_url()).await,
            Ok(Ok(_))
        );
        self.set_healthy(healthy);
        healthy
    }

    /// Waits for exclusive use of the page and records it as a use.
    pub async fn lease(self: &Arc<Self>) -> SessionLease {
        let guard = self.lease.clone().lock_owned().await;
        {
            let mut meta = self.lock_meta();
            meta.use_count += 1;
            meta.last_used = Some(Utc::now());
        }
        SessionLease::new(self.clone(), guard)
    }

    /// Exclusive use for maintenance, not recorded as a use. `None` when busy.
    pub fn try_lease(self: &Arc<Self>) -> Option<SessionLease> {
        let guard = self.lease.clone().try_lock_owned().ok()?;
        Some(SessionLease::new(self.clone(), guard))
    }

    fn lock_meta(&self) -> MutexGuard<'_, SessionMeta> {
        self.meta.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive right to drive one court page.
///
/// A lease that took the page away from its calendar (see
/// [`SessionLease::mark_dirty`]) and is dropped without putting it back,
/// for instance because its task was cancelled, leaves the session marked as
/// not positioned. The next lease or the maintenance loop navigates it home.
pub struct SessionLease {
    session: Arc<CourtSession>,
    dirty: bool,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    fn new(session: Arc<CourtSession>, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            session,
            dirty: false,
            _guard: guard,
        }
    }

    pub fn court(&self) -> CourtNumber {
        self.session.court
    }

    pub fn session(&self) -> &Arc<CourtSession> {
        &self.session
    }

    pub fn page(&self) -> &Arc<dyn CourtPage> {
        &self.session.page
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The page is about to leave the calendar.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.session.set_positioned(false);
    }

    /// Navigates back to the calendar unless the session is already there.
    pub async fn ensure_positioned(&mut self, limit: Duration) -> Result<(), SiteError> {
        if self.session.is_positioned() && !self.dirty {
            return Ok(());
        }
        debug!("Repositioning court {} on its calendar", self.court());
        match tokio::time::timeout(limit, self.session.page.navigate_home()).await {
            Ok(Ok(())) => {
                self.dirty = false;
                self.session.set_positioned(true);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SiteError::NavigationFailed(format!(
                "calendar of court {} did not load within {}ms",
                self.court(),
                limit.as_millis()
            ))),
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.dirty {
            debug!(
                "Court {} released away from its calendar, marked for repositioning",
                self.session.court
            );
            self.session.set_positioned(false);
        }
    }
}
