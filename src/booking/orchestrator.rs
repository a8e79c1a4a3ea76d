//! Races one booking request across its candidate courts.
//!
//! Each candidate court gets its own task running a [`BookingExecutor`]
//! (bounded by `max_concurrent`). The first successful result wins; every
//! other task is aborted and awaited before `book` returns, so no executor
//! outlives the call. Per-court reports are kept for diagnostics either way.

use chrono::Local;
use log::{debug, info, warn};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::booking::executor::BookingExecutor;
use crate::booking::retry::FormRetryPolicy;
use crate::booking::types::*;
use crate::configuration::types::{CourtNumber, OrchestratorConfig};
use crate::error_handling::types::FailureKind;

pub struct BookingOrchestrator {
    executor: Arc<BookingExecutor>,
    config: OrchestratorConfig,
    form_retry: FormRetryPolicy,
}

impl BookingOrchestrator {
    pub fn new(
        executor: Arc<BookingExecutor>,
        config: OrchestratorConfig,
        form_retry: FormRetryPolicy,
    ) -> Self {
        Self {
            executor,
            config,
            form_retry,
        }
    }

    pub fn executor(&self) -> &Arc<BookingExecutor> {
        &self.executor
    }

    /// Books `request` on the first candidate court that succeeds.
    pub async fn book(&self, request: &BookingRequest) -> BookingOutcome {
        let started = Instant::now();
        let courts = request.unique_courts();
        if courts.is_empty() {
            warn!("Request {} has no candidate courts", request.request_id);
            return BookingOutcome {
                request_id: request.request_id,
                winner: None,
                reports: BTreeMap::new(),
                elapsed_ms: 0,
            };
        }

        info!(
            "Request {}: racing courts {:?} for {} {}",
            request.request_id,
            courts,
            request.target_date,
            request.time_label()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let (tx, mut rx) = mpsc::unbounded_channel::<(CourtNumber, ExecutionResult)>();
        let shared_request = Arc::new(request.clone());

        let mut handles = Vec::with_capacity(courts.len());
        for court in courts {
            let executor = self.executor.clone();
            let form_retry = self.form_retry.clone();
            let request = shared_request.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = attempt_court(&executor, &form_retry, court, &request).await;
                // The receiver is gone once a winner was taken.
                let _ = tx.send((court, result));
            });
            handles.push((court, handle));
        }
        drop(tx);

        let deadline = started + self.config.booking_deadline();
        let mut results = BTreeMap::new();
        let mut winner: Option<ExecutionResult> = None;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((court, result))) => {
                    let success = result.is_success();
                    debug!("Request {}: {}", request.request_id, result.summary());
                    if success {
                        winner = Some(result.clone());
                    }
                    results.insert(court, result);
                    if success {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Request {}: deadline of {}s reached",
                        request.request_id,
                        self.config.booking_deadline().as_secs()
                    );
                    break;
                }
            }
        }

        for (_, handle) in &handles {
            handle.abort();
        }

        let mut reports = BTreeMap::new();
        for (court, handle) in handles {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    debug!("Court {} task cancelled", court);
                    reports.insert(court, CourtReport::Cancelled);
                }
                Err(e) => {
                    let message = panic_message(e.into_panic());
                    warn!("Court {} executor panicked: {}", court, message);
                    reports.insert(court, CourtReport::Panicked { message });
                }
            }
        }

        // Results sent between the winner and the abort.
        while let Ok((court, result)) = rx.try_recv() {
            if result.is_success() {
                warn!(
                    "Court {} also booked {} {} after the winner was chosen",
                    court,
                    request.target_date,
                    request.time_label()
                );
            }
            results.insert(court, result);
        }
        for (court, result) in results {
            reports.insert(court, CourtReport::Completed { result });
        }

        let outcome = BookingOutcome {
            request_id: request.request_id,
            winner,
            reports,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!("Request {}: {}", request.request_id, outcome.message());
        outcome
    }
}

/// One court's executor, retried after failed form submissions.
async fn attempt_court(
    executor: &BookingExecutor,
    form_retry: &FormRetryPolicy,
    court: CourtNumber,
    request: &BookingRequest,
) -> ExecutionResult {
    let mut retries = 0;
    loop {
        let result = executor.execute(court, request).await;
        if result.failure_kind() != Some(FailureKind::FormSubmissionFailed)
            || retries >= form_retry.max_retries
        {
            return result;
        }
        retries += 1;
        let delay = form_retry.delay_at(Local::now().naive_local(), request.target_datetime());
        warn!(
            "Court {}: form submission failed, retry {}/{} in {}ms",
            court,
            retries,
            form_retry.max_retries,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
