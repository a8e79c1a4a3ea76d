use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file and can be partially overridden
/// from the command line (see [`CliArgs`]).
///
/// # Fields Overview
///
/// - `courts`: the courts the pool keeps a warm session for, in launch order
/// - `pool`: session lifecycle knobs (stagger, warm-up, retries, recycling)
/// - `executor`: per-step and total budgets of a single booking attempt
/// - `orchestrator`: fan-out limits for parallel bookings and availability reads
/// - `site`: which browser engine drives the vendor site and how
/// - `web_interface`: optional HTTP surface for the two entry points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub courts: Vec<CourtConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub web_interface: WebInterfaceConfig,
}

/// Command-line arguments of the `courtbot` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "courtbot")]
#[command(version)]
#[command(about = "Keeps warm browser sessions per court and races bookings across them")]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_file: PathBuf,

    /// Force headless (true) or headed (false) browsers
    #[arg(long)]
    pub headless: Option<bool>,

    /// WebDriver endpoint, e.g. http://localhost:9515
    #[arg(long, env = "COURTBOT_DRIVER_URL")]
    pub driver_url: Option<String>,

    /// Enable the web interface on this port
    #[arg(long)]
    pub web_port: Option<u16>,

    /// Restrict the pool to these courts (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub courts: Vec<CourtNumber>,
}

impl Config {
    /// Reads, parses and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        debug!("Configuration parsed: {} courts", config.courts.len());
        Ok(config)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.courts.is_empty() {
            return Err(ConfigError::CourtsEmpty(
                "at least one [[courts]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for court in &self.courts {
            if !seen.insert(court.number) {
                return Err(ConfigError::DuplicateCourt(court.number));
            }
            if !court.calendar_url.starts_with("http://")
                && !court.calendar_url.starts_with("https://")
            {
                return Err(ConfigError::BadUrl(format!(
                    "court {} calendar_url must be http(s): {}",
                    court.number, court.calendar_url
                )));
            }
        }

        if self.orchestrator.max_concurrent == 0 {
            return Err(ConfigError::NotInRange(
                "orchestrator.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.executor.total_execution_ms == 0 {
            return Err(ConfigError::NotInRange(
                "executor.total_execution_ms must be positive".to_string(),
            ));
        }
        for (name, retry) in [
            ("pool.create_retry", &self.pool.create_retry),
            ("executor.slot_retry", &self.executor.slot_retry),
        ] {
            if retry.multiplier < 1.0 {
                return Err(ConfigError::NotInRange(format!(
                    "{}.multiplier must be >= 1.0",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Applies command-line overrides on top of the file configuration.
    pub fn apply_overrides(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(headless) = args.headless {
            self.site.headless = headless;
        }
        if let Some(url) = &args.driver_url {
            self.site.driver_url = url.clone();
        }
        if let Some(port) = args.web_port {
            self.web_interface.enabled = true;
            self.web_interface.port = port;
        }
        if !args.courts.is_empty() {
            let wanted: HashSet<CourtNumber> = args.courts.iter().copied().collect();
            self.courts.retain(|c| wanted.contains(&c.number));
        }
        self.validate()
    }

    pub fn court_numbers(&self) -> Vec<CourtNumber> {
        self.courts.iter().map(|c| c.number).collect()
    }

    pub fn court(&self, number: CourtNumber) -> Option<&CourtConfig> {
        self.courts.iter().find(|c| c.number == number)
    }
}
