use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Court numbers as shown by the club (1, 2, 3, ...).
pub type CourtNumber = u32;

/// One bookable court and where its calendar lives on the vendor site.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CourtConfig {
    pub number: CourtNumber,
    /// Calendar page the session is pre-navigated to.
    pub calendar_url: String,
    /// Vendor appointment type, used to build direct slot URLs.
    pub appointment_type_id: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Delay between consecutive court launches at start.
    pub stagger_ms: u64,
    /// Idle time after pre-navigation so the calendar settles.
    pub warmup_ms: u64,
    pub create_retry: RetrySettings,
    /// Budget for the liveness check done by `get_session`.
    pub liveness_timeout_ms: u64,
    /// Budget for opening a page and pre-navigating it.
    pub navigation_timeout_ms: u64,
    /// Upper bound `stop()` waits for in-flight bookings.
    pub shutdown_wait_secs: u64,
    pub refresh_interval_secs: u64,
    pub max_session_age_secs: u64,
    pub max_session_uses: u64,
    /// Budget of one recovery strategy (court, partial pool or restart).
    pub recovery_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stagger_ms: 1_500,
            warmup_ms: 10_000,
            create_retry: RetrySettings {
                max_retries: 2,
                initial_delay_ms: 2_000,
                multiplier: 2.0,
                max_delay_ms: 8_000,
            },
            liveness_timeout_ms: 2_000,
            navigation_timeout_ms: 25_000,
            shutdown_wait_secs: 300,
            refresh_interval_secs: 300,
            max_session_age_secs: 3_600,
            max_session_uses: 50,
            recovery_timeout_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs(self.max_session_age_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Retry knobs as written in the configuration file.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub total_execution_ms: u64,
    pub health_check_ms: u64,
    pub navigation_ms: u64,
    pub element_wait_ms: u64,
    pub form_filling_ms: u64,
    pub confirmation_ms: u64,
    /// Budget for putting the page back on its calendar after an attempt.
    pub reset_ms: u64,
    pub slot_retry: RetrySettings,
    pub form_retry: FormRetrySettings,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            total_execution_ms: 60_000,
            health_check_ms: 2_000,
            navigation_ms: 15_000,
            element_wait_ms: 5_000,
            form_filling_ms: 20_000,
            confirmation_ms: 10_000,
            reset_ms: 5_000,
            slot_retry: RetrySettings {
                max_retries: 10,
                initial_delay_ms: 250,
                multiplier: 1.5,
                max_delay_ms: 2_000,
            },
            form_retry: FormRetrySettings::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn total_execution(&self) -> Duration {
        Duration::from_millis(self.total_execution_ms)
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.health_check_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }

    pub fn form_filling(&self) -> Duration {
        Duration::from_millis(self.form_filling_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }

    pub fn reset(&self) -> Duration {
        Duration::from_millis(self.reset_ms)
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormRetrySettings {
    pub max_retries: u32,
    /// Pause between attempts while the nominal target time is still ahead.
    pub delay_before_target_ms: u64,
    /// Pause between attempts once the target time has passed.
    pub delay_after_target_ms: u64,
}

impl Default for FormRetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay_before_target_ms: 500,
            delay_after_target_ms: 2_000,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    /// Overall budget of one orchestrated booking, form retries included.
    pub booking_deadline_ms: u64,
    /// Per-court budget for availability reads.
    pub availability_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            booking_deadline_ms: 180_000,
            availability_timeout_ms: 30_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn booking_deadline(&self) -> Duration {
        Duration::from_millis(self.booking_deadline_ms)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Real browsers driven over the WebDriver protocol.
    Webdriver,
    /// In-memory pages, for rehearsals and tests.
    Scripted,
}

/// A relative day heading as printed above a block of time buttons.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DayLabel {
    /// Lower-case substrings that identify the heading in page text.
    pub patterns: Vec<String>,
    /// Days after the reference date this heading stands for.
    pub offset_days: i64,
}

pub fn default_day_labels() -> Vec<DayLabel> {
    let label = |patterns: &[&str], offset_days| DayLabel {
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        offset_days,
    };
    vec![
        label(&["hoy", "today"], 0),
        label(&["mañana", "manana", "tomorrow"], 1),
        label(&["esta semana", "estasemana", "this week"], 2),
        label(&["próxima semana", "proxima semana", "next week"], 2),
    ]
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub engine: EngineKind,
    pub driver_url: String,
    /// When set, a driver process is spawned from this binary at launch.
    pub driver_binary: Option<PathBuf>,
    pub headless: bool,
    /// UTC offset the vendor expects in direct slot URLs.
    pub utc_offset: String,
    pub day_labels: Vec<DayLabel>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Webdriver,
            driver_url: "http://localhost:9515".to_string(),
            driver_binary: None,
            headless: true,
            utc_offset: "-06:00".to_string(),
            day_labels: default_day_labels(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebInterfaceConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebInterfaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
