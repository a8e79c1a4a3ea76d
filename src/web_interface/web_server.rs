use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

use super::routes::{availability_route, booking_route, dashboard_route, pool_route};
use crate::booking::service::BookingService;
use crate::error_handling::types::WebError;

/// HTTP surface over the booking service
pub struct WebServer {
    service: Arc<BookingService>,
}

impl WebServer {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self { service }
    }

    /// Serves until the task running it is aborted.
    pub async fn start(&self, addr: SocketAddr) -> Result<(), WebError> {
        // Surface an occupied port as an error instead of a panic inside warp.
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;
        drop(listener);

        let routes = dashboard_route(self.service.clone())
            .or(pool_route(self.service.clone()))
            .or(availability_route(self.service.clone()))
            .or(booking_route(self.service.clone()));

        info!("Web interface listening on http://{}", addr);
        warp::serve(routes).run(addr).await;

        Ok(())
    }
}
