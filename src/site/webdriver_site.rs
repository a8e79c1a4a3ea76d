//! WebDriver site adapter for the Acuity scheduling pages.
//!
//! One WebDriver session is opened per court so each court keeps its own
//! cookies and history. When `site.driver_binary` is configured the engine
//! spawns the driver process itself and waits for its port to accept
//! connections before reporting the launch as done.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use log::{debug, info, warn};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::booking::types::UserInfo;
use crate::configuration::types::{CourtConfig, CourtNumber, SiteConfig};
use crate::error_handling::types::SiteError;
use crate::site::site_trait::{BrowserEngine, CourtPage};
use crate::site::types::{CalendarSnapshot, Confirmation, SlotLookup};

const TIME_BUTTON_SELECTOR: &str = "button.time-selection";
const SUBMIT_SELECTOR: &str = "button[type='submit']";
const FIRST_NAME_FIELD: &str = "client.firstName";
const ERROR_SELECTORS: [&str; 3] = [".alert-danger", ".error-message", "div[role='alert']"];

static CONFIRMATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/confirmation/([^/?#]+)").expect("Invalid regex"));

static NO_AVAILABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(no\s+\S*\s*disponib|no hay (citas|horarios)|no times are available|no availability)")
        .expect("Invalid regex")
});

/// Extracts the id from a `/confirmation/<id>` URL.
pub fn confirmation_id_from_url(url: &str) -> Option<String> {
    CONFIRMATION_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

pub fn shows_no_availability(page_text: &str) -> bool {
    NO_AVAILABILITY_RE.is_match(page_text)
}

/// Direct link to the booking form of one slot.
pub fn slot_url(court: &CourtConfig, date: NaiveDate, time: NaiveTime, utc_offset: &str) -> String {
    format!(
        "{}/datetime/{}T{}:00{}?appointmentTypeIds[]={}",
        court.calendar_url.trim_end_matches('/'),
        date.format("%Y-%m-%d"),
        time.format("%H:%M"),
        utc_offset,
        court.appointment_type_id
    )
}

/// Whether `url` is the direct page of the slot at `date` and `time`.
pub fn on_slot_page(url: &str, date: NaiveDate, time: NaiveTime) -> bool {
    url.contains(&format!("/datetime/{}T{}", date.format("%Y-%m-%d"), time.format("%H:%M")))
}

/// Whether a time button label denotes `time`. Labels come as "10:00",
/// "10:00 AM" or "10:00am" depending on the locale of the calendar.
pub fn time_label_matches(label: &str, time: NaiveTime) -> bool {
    let label = label.trim().to_lowercase();
    let h24 = time.format("%H:%M").to_string();
    let h24_short = time.format("%-H:%M").to_string();
    if label == h24 || label == h24_short {
        return true;
    }
    let h12 = time.format("%-I:%M").to_string();
    let meridiem = time.format("%P").to_string();
    label.starts_with(&h12) && label.replace(' ', "").ends_with(&meridiem)
}

pub struct WebDriverEngine {
    site: SiteConfig,
    courts: HashMap<CourtNumber, CourtConfig>,
    driver_process: Mutex<Option<Child>>,
}

impl WebDriverEngine {
    pub fn new(site: SiteConfig, courts: &[CourtConfig]) -> Self {
        Self {
            site,
            courts: courts.iter().map(|c| (c.number, c.clone())).collect(),
            driver_process: Mutex::new(None),
        }
    }

    fn capabilities(&self) -> Result<ChromeCapabilities, SiteError> {
        let mut caps = DesiredCapabilities::chrome();
        if self.site.headless {
            caps.add_arg("--headless=new")?;
        }
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--disable-dev-shm-usage")?;
        caps.add_arg("--disable-blink-features=AutomationControlled")?;
        Ok(caps)
    }

    /// `host:port` of the driver URL, used for the readiness check.
    fn driver_address(&self) -> Result<String, SiteError> {
        let without_scheme = self
            .site
            .driver_url
            .split("://")
            .nth(1)
            .unwrap_or(&self.site.driver_url);
        let authority = without_scheme.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(SiteError::LaunchFailed(format!(
                "Invalid driver url: {}",
                self.site.driver_url
            )));
        }
        Ok(authority.to_string())
    }

    /// Waits for the spawned driver to accept TCP connections.
    async fn wait_for_driver(&self) -> Result<(), SiteError> {
        let max_retries = 30;
        let address = self.driver_address()?;
        let mut retries = 0;

        while retries < max_retries {
            match TcpStream::connect(&address).await {
                Ok(_) => {
                    info!("WebDriver is accepting connections on {}", address);
                    return Ok(());
                }
                Err(e) => {
                    retries += 1;
                    let wait_time = std::cmp::min(200 + (retries * 100), 1000);
                    debug!(
                        "Driver connection attempt {}/{} on {} failed: {} - retrying in {}ms",
                        retries, max_retries, address, e, wait_time
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(wait_time)).await;
                }
            }
        }

        Err(SiteError::LaunchFailed(format!(
            "WebDriver did not come up on {} after {} attempts",
            address, max_retries
        )))
    }
}

#[async_trait]
impl BrowserEngine for WebDriverEngine {
    async fn launch(&self) -> Result<(), SiteError> {
        let Some(binary) = &self.site.driver_binary else {
            info!("Using external WebDriver at {}", self.site.driver_url);
            return Ok(());
        };

        let address = self.driver_address()?;
        let port = address.rsplit(':').next().unwrap_or("9515");
        info!("Spawning {} on port {}", binary.display(), port);

        let child = Command::new(binary)
            .arg(format!("--port={}", port))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SiteError::LaunchFailed(format!("Failed to spawn driver: {}", e)))?;
        *self.driver_process.lock().await = Some(child);

        self.wait_for_driver().await
    }

    async fn open_page(&self, court: CourtNumber) -> Result<Box<dyn CourtPage>, SiteError> {
        let court_config = self.courts.get(&court).ok_or(SiteError::NoPage(court))?.clone();
        let driver = WebDriver::new(self.site.driver_url.as_str(), self.capabilities()?)
            .await
            .map_err(|e| SiteError::LaunchFailed(e.to_string()))?;
        debug!("Opened WebDriver session for court {}", court);

        Ok(Box::new(WebDriverPage {
            court: court_config,
            utc_offset: self.site.utc_offset.clone(),
            driver: Mutex::new(Some(driver)),
        }))
    }

    async fn shutdown(&self) -> Result<(), SiteError> {
        if let Some(mut process) = self.driver_process.lock().await.take() {
            debug!("Terminating WebDriver process");
            if let Err(e) = process.kill().await {
                warn!("Failed to kill WebDriver process: {}", e);
            }
        }
        Ok(())
    }
}

pub struct WebDriverPage {
    court: CourtConfig,
    utc_offset: String,
    /// `None` once the session has been quit.
    driver: Mutex<Option<WebDriver>>,
}

impl WebDriverPage {
    async fn driver(&self) -> Result<WebDriver, SiteError> {
        self.driver.lock().await.clone().ok_or_else(|| {
            SiteError::Disconnected(format!("session for court {} was closed", self.court.number))
        })
    }

    async fn body_text(&self, driver: &WebDriver) -> Result<String, SiteError> {
        Ok(driver.find(By::Tag("body")).await?.text().await?)
    }

    async fn time_buttons(&self, driver: &WebDriver) -> Result<Vec<WebElement>, SiteError> {
        Ok(driver.find_all(By::Css(TIME_BUTTON_SELECTOR)).await?)
    }

    async fn fill_field(&self, driver: &WebDriver, id: &str, value: &str) -> Result<(), SiteError> {
        let field = driver
            .find(By::Id(id))
            .await
            .map_err(|_| SiteError::ElementMissing(format!("form field {}", id)))?;
        field.clear().await?;
        field.send_keys(value).await?;
        Ok(())
    }
}

#[async_trait]
impl CourtPage for WebDriverPage {
    fn court(&self) -> CourtNumber {
        self.court.number
    }

    async fn current_url(&self) -> Result<String, SiteError> {
        let driver = self.driver().await?;
        Ok(driver.current_url().await?.to_string())
    }

    async fn navigate_home(&self) -> Result<(), SiteError> {
        let driver = self.driver().await?;
        driver
            .goto(self.court.calendar_url.as_str())
            .await
            .map_err(|e| match SiteError::from(e) {
                SiteError::WebDriver(msg) => SiteError::NavigationFailed(msg),
                other => other,
            })
    }

    async fn reload(&self) -> Result<(), SiteError> {
        Ok(self.driver().await?.refresh().await?)
    }

    /// Looks on the slot's own page, so only the target day's times count.
    /// A free slot's direct link lands straight on the booking form.
    async fn find_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<SlotLookup, SiteError> {
        let driver = self.driver().await?;
        let url = slot_url(&self.court, date, time, &self.utc_offset);
        let current = driver.current_url().await?.to_string();
        if !on_slot_page(&current, date, time) {
            debug!("Court {} looking for {} on {}", self.court.number, time, date);
            driver.goto(url.as_str()).await?;
        }

        if !driver.find_all(By::Id(FIRST_NAME_FIELD)).await?.is_empty() {
            return Ok(SlotLookup::Ready);
        }
        for button in self.time_buttons(&driver).await? {
            let label = button.text().await?;
            if time_label_matches(&label, time) {
                if button.is_enabled().await? {
                    return Ok(SlotLookup::Ready);
                }
                return Ok(SlotLookup::Unavailable);
            }
        }
        if shows_no_availability(&self.body_text(&driver).await?) {
            return Ok(SlotLookup::Unavailable);
        }
        Ok(SlotLookup::NotRendered)
    }

    async fn open_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<(), SiteError> {
        let driver = self.driver().await?;
        let on_form = on_slot_page(driver.current_url().await?.as_str(), date, time)
            && !driver.find_all(By::Id(FIRST_NAME_FIELD)).await?.is_empty();
        if !on_form {
            let url = slot_url(&self.court, date, time, &self.utc_offset);
            debug!("Court {} opening slot form {}", self.court.number, url);
            driver.goto(url.as_str()).await?;
        }
        driver
            .query(By::Id(FIRST_NAME_FIELD))
            .first()
            .await
            .map_err(|_| SiteError::ElementMissing("booking form".to_string()))?;
        Ok(())
    }

    async fn fill_form(&self, user: &UserInfo) -> Result<(), SiteError> {
        let driver = self.driver().await?;
        self.fill_field(&driver, FIRST_NAME_FIELD, &user.first_name).await?;
        self.fill_field(&driver, "client.lastName", &user.last_name).await?;
        self.fill_field(&driver, "client.phone", &user.phone).await?;
        self.fill_field(&driver, "client.email", &user.email).await?;
        Ok(())
    }

    async fn submit_form(&self) -> Result<(), SiteError> {
        let driver = self.driver().await?;
        let submit = driver
            .find(By::Css(SUBMIT_SELECTOR))
            .await
            .map_err(|_| SiteError::ElementMissing("submit button".to_string()))?;
        submit.click().await?;

        for selector in ERROR_SELECTORS {
            if let Some(alert) = driver.find_all(By::Css(selector)).await?.into_iter().next() {
                let text = alert.text().await.unwrap_or_default();
                if !text.trim().is_empty() {
                    return Err(SiteError::NavigationFailed(text.trim().to_string()));
                }
            }
        }
        Ok(())
    }

    async fn confirmation(&self) -> Result<Option<Confirmation>, SiteError> {
        let url = self.current_url().await?;
        if !url.contains("/confirmation/") {
            return Ok(None);
        }
        Ok(Some(Confirmation {
            confirmation_id: confirmation_id_from_url(&url),
            url,
        }))
    }

    async fn read_calendar(&self) -> Result<CalendarSnapshot, SiteError> {
        let driver = self.driver().await?;
        let mut times = Vec::new();
        for button in self.time_buttons(&driver).await? {
            let label = button.text().await?;
            let label = label.trim();
            if !label.is_empty() {
                times.push(label.to_string());
            }
        }
        Ok(CalendarSnapshot {
            text: self.body_text(&driver).await?,
            times,
        })
    }

    async fn close(&self) -> Result<(), SiteError> {
        match self.driver.lock().await.take() {
            Some(driver) => Ok(driver.quit().await?),
            None => Err(SiteError::Disconnected("session already closed".to_string())),
        }
    }
}
