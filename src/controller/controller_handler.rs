use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::booking::service::BookingService;
use crate::browser_pool::maintenance::spawn_maintenance;
use crate::browser_pool::pool::BrowserPool;
use crate::browser_pool::types::ShutdownReport;
use crate::configuration::config::Config;
use crate::error_handling::types::*;
use crate::site::engine_from_config;
use crate::web_interface::web_server::WebServer;

/// Owns the running parts of the bot and the order they start and stop in.
pub struct Controller {
    pub config: Config,
    pool: Option<Arc<BrowserPool>>,
    service: Option<Arc<BookingService>>,
    maintenance: Option<JoinHandle<()>>,
    web_server: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            config,
            pool: None,
            service: None,
            maintenance: None,
            web_server: None,
        })
    }

    pub fn service(&self) -> Option<&Arc<BookingService>> {
        self.service.as_ref()
    }

    /// Starts everything, waits for Ctrl-C, then shuts down.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        self.start().await?;

        info!("Courtbot is running. Press Ctrl+C to stop.");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for the shutdown signal: {}", e);
        }
        info!("Shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    /// Engine, pool, booking service, maintenance loop and web interface.
    pub async fn start(&mut self) -> Result<Arc<BookingService>, ControllerError> {
        if self.pool.is_some() {
            return Err(ControllerError::InitializationFailed(
                "controller already started".to_string(),
            ));
        }

        let web_addr = self.web_address()?;
        let engine = engine_from_config(&self.config);
        let pool = Arc::new(BrowserPool::new(
            engine,
            self.config.court_numbers(),
            self.config.pool.clone(),
        ));
        pool.start().await?;

        let service = Arc::new(BookingService::from_config(pool.clone(), &self.config));
        self.maintenance = Some(spawn_maintenance(
            pool.clone(),
            self.config.pool.refresh_interval(),
        ));

        if let Some(addr) = web_addr {
            let server = WebServer::new(service.clone());
            self.web_server = Some(tokio::spawn(async move {
                if let Err(e) = server.start(addr).await {
                    error!("Web interface stopped: {}", e);
                }
            }));
        }

        self.pool = Some(pool);
        self.service = Some(service.clone());
        Ok(service)
    }

    fn web_address(&self) -> Result<Option<SocketAddr>, ControllerError> {
        let web = &self.config.web_interface;
        if !web.enabled {
            return Ok(None);
        }
        format!("{}:{}", web.bind_address, web.port)
            .parse()
            .map(Some)
            .map_err(|e| {
                ControllerError::InitializationFailed(format!(
                    "invalid web interface address {}:{}: {}",
                    web.bind_address, web.port, e
                ))
            })
    }

    /// Stops the web interface, then the pool; the maintenance loop follows
    /// the pool. Returns `None` when nothing was started.
    pub async fn shutdown(&mut self) -> Option<ShutdownReport> {
        if let Some(web) = self.web_server.take() {
            web.abort();
            let _ = web.await;
        }

        let pool = self.pool.take()?;
        self.service = None;
        let report = pool.stop().await;
        if let Some(maintenance) = self.maintenance.take() {
            if let Err(e) = maintenance.await {
                warn!("Maintenance loop ended abnormally: {}", e);
            }
        }
        info!(
            "Shutdown complete: {} sessions closed, {} teardown errors ignored",
            report.sessions_closed, report.errors_swallowed
        );
        Some(report)
    }
}
