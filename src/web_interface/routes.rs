use std::sync::Arc;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, AvailabilityQuery, PoolStatusResponse};
use crate::booking::service::{AvailabilityReport, BookingService};
use crate::booking::types::{BookingOutcome, BookingRequest};
use crate::browser_pool::types::HealthStatus;

fn with_service(
    service: Arc<BookingService>,
) -> impl Filter<Extract = (Arc<BookingService>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || service.clone())
}

fn json_reply<T: serde::Serialize>(status: StatusCode, body: &T) -> reply::Response {
    reply::with_status(reply::json(body), status).into_response()
}

fn error_reply(status: StatusCode, error: ApiError) -> reply::Response {
    json_reply(status, &error)
}

/// GET /
pub fn dashboard_route(
    service: Arc<BookingService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(with_service(service))
        .and_then(|service: Arc<BookingService>| async move {
            let courts = service.pool().get_available_courts().await;
            let html = format!(
                "<html><head><title>Courtbot</title></head><body><h1>Courtbot is running</h1>\
                 <p>Courts ready: {:?}</p><p>See /api/pool for JSON.</p></body></html>",
                courts
            );
            Ok::<_, Rejection>(reply::html(html))
        })
}

/// Pool stats and health; 503 when no court is usable.
pub async fn pool_status(service: &BookingService) -> (StatusCode, PoolStatusResponse) {
    let pool = service.pool();
    let response = PoolStatusResponse {
        health: pool.health().await,
        stats: pool.stats().await,
    };
    let status = match response.health.status {
        HealthStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, response)
}

/// GET /api/pool
pub fn pool_route(
    service: Arc<BookingService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "pool")
        .and(warp::get())
        .and(with_service(service))
        .and_then(|service: Arc<BookingService>| async move {
            let (status, body) = pool_status(&service).await;
            Ok::<_, Rejection>(json_reply(status, &body))
        })
}

/// Rejects courts the pool was never configured with.
pub async fn check_availability(
    service: &BookingService,
    query: AvailabilityQuery,
) -> Result<AvailabilityReport, ApiError> {
    let known = service.pool().requested_courts();
    if let Some(court) = query.courts.iter().find(|c| !known.contains(c)) {
        return Err(ApiError::new(format!("Unknown court {}", court)));
    }
    Ok(service.check_availability(&query.courts).await)
}

/// POST /api/availability
pub fn availability_route(
    service: Arc<BookingService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "availability")
        .and(warp::post())
        .and(with_service(service))
        .and(warp::body::json())
        .and_then(|service: Arc<BookingService>, query: AvailabilityQuery| async move {
            let res = match check_availability(&service, query).await {
                Ok(report) => json_reply(StatusCode::OK, &report),
                Err(e) => error_reply(StatusCode::BAD_REQUEST, e),
            };
            Ok::<_, Rejection>(res)
        })
}

fn validate_request(request: &BookingRequest) -> Result<(), ApiError> {
    if request.candidate_courts.is_empty() {
        return Err(ApiError::new("At least one candidate court is required"));
    }
    let user = &request.user;
    if user.first_name.trim().is_empty() || user.last_name.trim().is_empty() {
        return Err(ApiError::new("First and last name are required"));
    }
    if !user.email.contains('@') {
        return Err(ApiError::new(format!("Invalid email '{}'", user.email)));
    }
    Ok(())
}

/// Validates and runs a booking. A finished attempt is never an `Err`,
/// booked or not.
pub async fn create_booking(
    service: &BookingService,
    request: BookingRequest,
) -> Result<BookingOutcome, ApiError> {
    validate_request(&request)?;
    Ok(service.attempt_booking(&request).await)
}

/// POST /api/bookings
pub fn booking_route(
    service: Arc<BookingService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "bookings")
        .and(warp::post())
        .and(with_service(service))
        .and(warp::body::json())
        .and_then(|service: Arc<BookingService>, request: BookingRequest| async move {
            let res = match create_booking(&service, request).await {
                Ok(outcome) if outcome.is_success() => json_reply(StatusCode::CREATED, &outcome),
                Ok(outcome) => json_reply(StatusCode::CONFLICT, &outcome),
                Err(e) => error_reply(StatusCode::BAD_REQUEST, e),
            };
            Ok::<_, Rejection>(res)
        })
}
