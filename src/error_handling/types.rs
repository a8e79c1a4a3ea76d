use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    CourtsEmpty(String),
    DuplicateCourt(u32),
    BadUrl(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::CourtsEmpty(e) => write!(f, "Courts configuration error: {}", e),
            ConfigError::DuplicateCourt(c) => write!(f, "Court {} is configured twice", c),
            ConfigError::BadUrl(e) => write!(f, "URL error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Failures reported by a site adapter (browser engine or court page).
#[derive(Debug, Clone, PartialEq)]
pub enum SiteError {
    /// The page, context or driver connection is gone ("target closed").
    Disconnected(String),
    LaunchFailed(String),
    NavigationFailed(String),
    ElementMissing(String),
    WebDriver(String),
    NoPage(u32),
    /// A driver call that did not answer within its budget.
    TimedOut(String),
}

impl SiteError {
    /// True for errors that only mean the other side already went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SiteError::Disconnected(_))
    }
}

impl fmt::Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteError::Disconnected(e) => write!(f, "Connection closed: {}", e),
            SiteError::LaunchFailed(e) => write!(f, "Browser engine launch failed: {}", e),
            SiteError::NavigationFailed(e) => write!(f, "Navigation failed: {}", e),
            SiteError::ElementMissing(e) => write!(f, "Element not found: {}", e),
            SiteError::WebDriver(e) => write!(f, "WebDriver error: {}", e),
            SiteError::NoPage(c) => write!(f, "No page configured for court {}", c),
            SiteError::TimedOut(e) => write!(f, "Timed out: {}", e),
        }
    }
}

impl std::error::Error for SiteError {}

impl From<thirtyfour::error::WebDriverError> for SiteError {
    fn from(err: thirtyfour::error::WebDriverError) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("connection closed")
            || lowered.contains("target closed")
            || lowered.contains("invalid session id")
            || lowered.contains("no such window")
        {
            SiteError::Disconnected(message)
        } else {
            SiteError::WebDriver(message)
        }
    }
}

#[derive(Debug)]
pub enum PoolError {
    EngineLaunch(SiteError),
    /// Every configured court failed to initialize: (failed, requested).
    NoCourtsReady(usize, usize),
    NotStarted,
    AlreadyStarted,
    Stopped,
    /// A booking is in flight; the pool cannot be torn down now.
    CriticalOperation,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::EngineLaunch(e) => write!(f, "Browser engine error: {}", e),
            PoolError::NoCourtsReady(failed, requested) => write!(
                f,
                "All court initializations failed: {}/{} courts failed",
                failed, requested
            ),
            PoolError::NotStarted => write!(f, "Browser pool not started"),
            PoolError::AlreadyStarted => write!(f, "Browser pool already started"),
            PoolError::Stopped => write!(f, "Browser pool was stopped"),
            PoolError::CriticalOperation => {
                write!(f, "Critical operation in progress, pool left untouched")
            }
        }
    }
}

impl std::error::Error for PoolError {}

impl From<SiteError> for PoolError {
    fn from(err: SiteError) -> Self {
        PoolError::EngineLaunch(err)
    }
}

/// Booking failure taxonomy. Cancellation is not part of it: a cancelled
/// attempt is a dropped future and surfaces through the task handle instead.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingError {
    SessionUnavailable(String),
    SlotUnavailable(String),
    SlotNotYetRendered(String),
    FormSubmissionFailed(String),
    /// Stage name and the budget that was exceeded.
    Timeout(&'static str, Duration),
    Unexpected(String),
}

impl BookingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BookingError::SessionUnavailable(_) => FailureKind::SessionUnavailable,
            BookingError::SlotUnavailable(_) => FailureKind::SlotUnavailable,
            BookingError::SlotNotYetRendered(_) => FailureKind::SlotNotYetRendered,
            BookingError::FormSubmissionFailed(_) => FailureKind::FormSubmissionFailed,
            BookingError::Timeout(_, _) => FailureKind::Timeout,
            BookingError::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingError::SessionUnavailable(e) => write!(f, "Session unavailable: {}", e),
            BookingError::SlotUnavailable(e) => write!(f, "Slot unavailable: {}", e),
            BookingError::SlotNotYetRendered(e) => write!(f, "Slot not rendered yet: {}", e),
            BookingError::FormSubmissionFailed(e) => write!(f, "Form submission failed: {}", e),
            BookingError::Timeout(stage, budget) => {
                write!(f, "{} timed out after {:.1}s", stage, budget.as_secs_f64())
            }
            BookingError::Unexpected(e) => write!(f, "Unexpected error: {}", e),
        }
    }
}

impl std::error::Error for BookingError {}

/// Flat classification of a failed booking attempt, kept on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SessionUnavailable,
    SlotUnavailable,
    SlotNotYetRendered,
    FormSubmissionFailed,
    Timeout,
    Unexpected,
}

impl FailureKind {
    /// Whether another court may still succeed where this one failed.
    pub fn is_retryable_elsewhere(&self) -> bool {
        !matches!(self, FailureKind::SlotUnavailable)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::SessionUnavailable => "session unavailable",
            FailureKind::SlotUnavailable => "slot unavailable",
            FailureKind::SlotNotYetRendered => "slot not rendered",
            FailureKind::FormSubmissionFailed => "form submission failed",
            FailureKind::Timeout => "timeout",
            FailureKind::Unexpected => "unexpected error",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web interface bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    PoolError(PoolError),
    SiteError(SiteError),
    WebError(WebError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::PoolError(e) => write!(f, "Pool error: {}", e),
            ControllerError::SiteError(e) => write!(f, "Site error: {}", e),
            ControllerError::WebError(e) => write!(f, "Web error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<PoolError> for ControllerError {
    fn from(err: PoolError) -> Self {
        ControllerError::PoolError(err)
    }
}

impl From<SiteError> for ControllerError {
    fn from(err: SiteError) -> Self {
        ControllerError::SiteError(err)
    }
}

impl From<WebError> for ControllerError {
    fn from(err: WebError) -> Self {
        ControllerError::WebError(err)
    }
}
