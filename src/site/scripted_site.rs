//! In-memory site adapter.
//!
//! `ScriptedEngine` hands out pages that follow a per-court [`CourtScript`]
//! instead of talking to a browser. It backs the `scripted` engine kind (dry
//! runs of the whole bot without touching the vendor) and every test of the
//! pool, executor and orchestrator. Counters for each court are observable
//! through [`ScriptedEngine::counters`].

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::booking::types::UserInfo;
use crate::configuration::types::CourtNumber;
use crate::error_handling::types::SiteError;
use crate::site::site_trait::{BrowserEngine, CourtPage};
use crate::site::types::{CalendarSnapshot, Confirmation, SlotLookup};

/// How the target slot behaves on a scripted page.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotScript {
    Ready,
    /// Rendered once the page has been reloaded this many times.
    AppearsAfterReloads(u32),
    Never,
    Taken,
}

#[derive(Debug, Clone)]
pub struct CourtScript {
    /// The first `open_failures` calls to `open_page` fail.
    pub open_failures: u32,
    /// Latency of navigations, reloads and opening the slot form.
    pub navigation_delay: Duration,
    /// Latency of filling and submitting the form.
    pub step_delay: Duration,
    pub slot: SlotScript,
    /// The first `submit_failures` submissions fail.
    pub submit_failures: u32,
    /// Whether a submitted form ends on a confirmation page.
    pub confirms: bool,
    pub confirmation_id: Option<String>,
    pub calendar: CalendarSnapshot,
    /// Error returned by `close`, e.g. an already dropped connection.
    pub close_error: Option<SiteError>,
    /// `close` never returns, like a wedged driver session.
    pub close_hangs: bool,
}

impl Default for CourtScript {
    fn default() -> Self {
        Self {
            open_failures: 0,
            navigation_delay: Duration::ZERO,
            step_delay: Duration::ZERO,
            slot: SlotScript::Ready,
            submit_failures: 0,
            confirms: true,
            confirmation_id: None,
            calendar: CalendarSnapshot::default(),
            close_error: None,
            close_hangs: false,
        }
    }
}

/// Observable activity of one court across all its pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedCounters {
    pub open_attempts: u32,
    pub pages_opened: u32,
    pub pages_closed: u32,
    pub navigations: u32,
    pub reloads: u32,
    pub slot_lookups: u32,
    pub forms_filled: u32,
    pub submissions: u32,
    pub liveness_checks: u32,
}

struct CourtState {
    script: CourtScript,
    counters: ScriptedCounters,
    pending_liveness_failures: u32,
}

#[derive(Default)]
struct EngineState {
    courts: HashMap<CourtNumber, CourtState>,
    launch_error: Option<SiteError>,
    shutdown_hangs: bool,
    launched: u32,
    shutdowns: u32,
}

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_court(self, court: CourtNumber, script: CourtScript) -> Self {
        self.lock().courts.insert(
            court,
            CourtState {
                script,
                counters: ScriptedCounters::default(),
                pending_liveness_failures: 0,
            },
        );
        self
    }

    pub fn with_launch_error(self, error: SiteError) -> Self {
        self.lock().launch_error = Some(error);
        self
    }

    /// Makes `shutdown` never return.
    pub fn with_hanging_shutdown(self) -> Self {
        self.lock().shutdown_hangs = true;
        self
    }

    /// Makes the next `count` liveness checks on `court` fail.
    pub fn fail_liveness_checks(&self, court: CourtNumber, count: u32) {
        if let Some(state) = self.lock().courts.get_mut(&court) {
            state.pending_liveness_failures = count;
        }
    }

    /// Makes the next `count` calls to `open_page` for `court` fail.
    pub fn fail_opens(&self, court: CourtNumber, count: u32) {
        if let Some(state) = self.lock().courts.get_mut(&court) {
            state.script.open_failures = count;
        }
    }

    pub fn set_slot(&self, court: CourtNumber, slot: SlotScript) {
        if let Some(state) = self.lock().courts.get_mut(&court) {
            state.script.slot = slot;
        }
    }

    pub fn counters(&self, court: CourtNumber) -> ScriptedCounters {
        self.lock()
            .courts
            .get(&court)
            .map(|s| s.counters.clone())
            .unwrap_or_default()
    }

    pub fn launches(&self) -> u32 {
        self.lock().launched
    }

    pub fn shutdowns(&self) -> u32 {
        self.lock().shutdowns
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn launch(&self) -> Result<(), SiteError> {
        let mut state = self.lock();
        if let Some(err) = state.launch_error.clone() {
            return Err(err);
        }
        state.launched += 1;
        debug!("Scripted engine launched ({} courts scripted)", state.courts.len());
        Ok(())
    }

    async fn open_page(&self, court: CourtNumber) -> Result<Box<dyn CourtPage>, SiteError> {
        let mut state = self.lock();
        let court_state = state.courts.get_mut(&court).ok_or(SiteError::NoPage(court))?;
        court_state.counters.open_attempts += 1;
        if court_state.script.open_failures > 0 {
            court_state.script.open_failures -= 1;
            return Err(SiteError::LaunchFailed(format!(
                "scripted open failure for court {}",
                court
            )));
        }
        court_state.counters.pages_opened += 1;
        Ok(Box::new(ScriptedPage {
            court,
            engine: self.clone(),
            page: Mutex::new(PageState::default()),
        }))
    }

    async fn shutdown(&self) -> Result<(), SiteError> {
        let hangs = {
            let mut state = self.lock();
            state.shutdowns += 1;
            state.shutdown_hangs
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[derive(Default)]
struct PageState {
    location: Location,
    reloads: u32,
    closed: bool,
}

#[derive(Default, Clone, Copy, PartialEq)]
enum Location {
    #[default]
    Blank,
    Calendar,
    Form,
    Submitted,
}

pub struct ScriptedPage {
    court: CourtNumber,
    engine: ScriptedEngine,
    page: Mutex<PageState>,
}

impl ScriptedPage {
    fn page(&self) -> MutexGuard<'_, PageState> {
        self.page.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn script(&self) -> CourtScript {
        self.engine
            .lock()
            .courts
            .get(&self.court)
            .map(|s| s.script.clone())
            .unwrap_or_default()
    }

    fn count(&self, update: impl FnOnce(&mut ScriptedCounters)) {
        if let Some(state) = self.engine.lock().courts.get_mut(&self.court) {
            update(&mut state.counters);
        }
    }

    fn ensure_open(&self) -> Result<(), SiteError> {
        if self.page().closed {
            return Err(SiteError::Disconnected(format!(
                "page for court {} is closed",
                self.court
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CourtPage for ScriptedPage {
    fn court(&self) -> CourtNumber {
        self.court
    }

    async fn current_url(&self) -> Result<String, SiteError> {
        self.ensure_open()?;
        {
            let mut engine = self.engine.lock();
            if let Some(state) = engine.courts.get_mut(&self.court) {
                state.counters.liveness_checks += 1;
                if state.pending_liveness_failures > 0 {
                    state.pending_liveness_failures -= 1;
                    return Err(SiteError::Disconnected("scripted liveness failure".to_string()));
                }
            }
        }
        let path = match self.page().location {
            Location::Blank => "about:blank".to_string(),
            Location::Calendar => format!("scripted://court/{}/calendar", self.court),
            Location::Form => format!("scripted://court/{}/datetime", self.court),
            Location::Submitted => format!("scripted://court/{}/confirmation", self.court),
        };
        Ok(path)
    }

    async fn navigate_home(&self) -> Result<(), SiteError> {
        self.ensure_open()?;
        tokio::time::sleep(self.script().navigation_delay).await;
        self.count(|c| c.navigations += 1);
        self.page().location = Location::Calendar;
        Ok(())
    }

    async fn reload(&self) -> Result<(), SiteError> {
        self.ensure_open()?;
        tokio::time::sleep(self.script().navigation_delay).await;
        self.count(|c| c.reloads += 1);
        self.page().reloads += 1;
        Ok(())
    }

    async fn find_slot(&self, _date: NaiveDate, _time: NaiveTime) -> Result<SlotLookup, SiteError> {
        self.ensure_open()?;
        self.count(|c| c.slot_lookups += 1);
        let reloads = self.page().reloads;
        let lookup = match self.script().slot {
            SlotScript::Ready => SlotLookup::Ready,
            SlotScript::AppearsAfterReloads(n) if reloads >= n => SlotLookup::Ready,
            SlotScript::AppearsAfterReloads(_) | SlotScript::Never => SlotLookup::NotRendered,
            SlotScript::Taken => SlotLookup::Unavailable,
        };
        Ok(lookup)
    }

    async fn open_slot(&self, _date: NaiveDate, _time: NaiveTime) -> Result<(), SiteError> {
        self.ensure_open()?;
        tokio::time::sleep(self.script().navigation_delay).await;
        self.page().location = Location::Form;
        Ok(())
    }

    async fn fill_form(&self, _user: &UserInfo) -> Result<(), SiteError> {
        self.ensure_open()?;
        if self.page().location != Location::Form {
            return Err(SiteError::ElementMissing("booking form".to_string()));
        }
        tokio::time::sleep(self.script().step_delay).await;
        self.count(|c| c.forms_filled += 1);
        Ok(())
    }

    async fn submit_form(&self) -> Result<(), SiteError> {
        self.ensure_open()?;
        tokio::time::sleep(self.script().step_delay).await;
        self.count(|c| c.submissions += 1);
        let failed = {
            let mut engine = self.engine.lock();
            match engine.courts.get_mut(&self.court) {
                Some(state) if state.script.submit_failures > 0 => {
                    state.script.submit_failures -= 1;
                    true
                }
                _ => false,
            }
        };
        if failed {
            return Err(SiteError::ElementMissing("submit button".to_string()));
        }
        self.page().location = Location::Submitted;
        Ok(())
    }

    async fn confirmation(&self) -> Result<Option<Confirmation>, SiteError> {
        self.ensure_open()?;
        let script = self.script();
        if self.page().location != Location::Submitted || !script.confirms {
            return Ok(None);
        }
        let id = script.confirmation_id.clone();
        Ok(Some(Confirmation {
            url: format!(
                "scripted://court/{}/confirmation/{}",
                self.court,
                id.as_deref().unwrap_or("")
            ),
            confirmation_id: id,
        }))
    }

    async fn read_calendar(&self) -> Result<CalendarSnapshot, SiteError> {
        self.ensure_open()?;
        Ok(self.script().calendar)
    }

    async fn close(&self) -> Result<(), SiteError> {
        {
            let mut page = self.page();
            if page.closed {
                return Err(SiteError::Disconnected("page already closed".to_string()));
            }
            page.closed = true;
        }
        self.count(|c| c.pages_closed += 1);
        let script = self.script();
        if script.close_hangs {
            std::future::pending::<()>().await;
        }
        match script.close_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
