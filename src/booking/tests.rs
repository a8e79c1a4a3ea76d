use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::availability::AvailabilityChecker;
use crate::booking::*;
use crate::browser_pool::BrowserPool;
use crate::configuration::types::{default_day_labels, CourtNumber, ExecutorConfig, OrchestratorConfig, PoolConfig};
use crate::error_handling::types::FailureKind;
use crate::site::scripted_site::{CourtScript, ScriptedEngine, SlotScript};
use crate::site::types::CalendarSnapshot;

fn pool_config() -> PoolConfig {
    PoolConfig {
        stagger_ms: 0,
        warmup_ms: 0,
        ..PoolConfig::default()
    }
}

async fn started_pool(engine: &ScriptedEngine, courts: &[CourtNumber]) -> Arc<BrowserPool> {
    let pool = Arc::new(BrowserPool::new(
        Arc::new(engine.clone()),
        courts.to_vec(),
        pool_config(),
    ));
    pool.start().await.unwrap();
    pool
}

fn request(courts: Vec<CourtNumber>) -> BookingRequest {
    BookingRequest::new(
        UserInfo {
            first_name: "Ana".to_string(),
            last_name: "Lopez".to_string(),
            email: "ana@example.com".to_string(),
            phone: "55551234".to_string(),
        },
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        courts,
    )
}

fn orchestrator(executor: BookingExecutor, form_retries: u32) -> BookingOrchestrator {
    BookingOrchestrator::new(
        Arc::new(executor),
        OrchestratorConfig::default(),
        FormRetryPolicy {
            max_retries: form_retries,
            delay_before_target: Duration::from_millis(500),
            delay_after_target: Duration::from_millis(2_000),
        },
    )
}

fn taken() -> CourtScript {
    CourtScript {
        slot: SlotScript::Taken,
        ..CourtScript::default()
    }
}

fn slow_navigation(delay: Duration) -> CourtScript {
    CourtScript {
        navigation_delay: delay,
        ..CourtScript::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_success_wins_and_losers_are_cancelled() {
    let engine = ScriptedEngine::new()
        .with_court(1, taken())
        .with_court(
            2,
            CourtScript {
                step_delay: Duration::from_millis(1_500),
                confirmation_id: Some("ABC123".to_string()),
                ..CourtScript::default()
            },
        )
        .with_court(3, slow_navigation(Duration::from_secs(10)));
    let pool = started_pool(&engine, &[1, 2, 3]).await;
    let orchestrator = orchestrator(BookingExecutor::new(pool.clone(), ExecutorConfig::default()), 0);

    let started = Instant::now();
    let outcome = orchestrator.book(&request(vec![1, 2, 3])).await;
    let elapsed = started.elapsed();

    assert!(outcome.is_success());
    assert_eq!(outcome.court(), Some(2));
    assert_eq!(outcome.confirmation_id(), Some("ABC123"));
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_millis(3_500));

    assert_eq!(outcome.reports[&3], CourtReport::Cancelled);
    match &outcome.reports[&1] {
        CourtReport::Completed { result } => {
            assert_eq!(result.failure_kind(), Some(FailureKind::SlotUnavailable));
        }
        other => panic!("court 1 should have completed: {:?}", other),
    }
    assert!(matches!(&outcome.reports[&2], CourtReport::Completed { result } if result.is_success()));

    // court 3 was cancelled mid-navigation: no guard or lease survives it
    assert!(!pool.is_critical_operation_in_progress());
    let court3 = pool.get_session(3).await.unwrap();
    assert!(!court3.is_leased());
    assert!(!court3.is_positioned());
    assert_eq!(engine.counters(3).submissions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_all_failures_report_every_court() {
    let engine = ScriptedEngine::new()
        .with_court(1, taken())
        .with_court(
            2,
            CourtScript {
                confirms: false,
                ..CourtScript::default()
            },
        );
    let pool = started_pool(&engine, &[1, 2]).await;
    let orchestrator = orchestrator(BookingExecutor::new(pool, ExecutorConfig::default()), 0);

    let outcome = orchestrator.book(&request(vec![1, 2, 3])).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.reports.len(), 3);
    for report in outcome.reports.values() {
        assert!(matches!(report, CourtReport::Completed { .. }));
        assert!(!report.reason().is_empty());
    }
    let kind = |court| match &outcome.reports[&court] {
        CourtReport::Completed { result } => result.failure_kind(),
        _ => None,
    };
    assert_eq!(kind(1), Some(FailureKind::SlotUnavailable));
    assert_eq!(kind(2), Some(FailureKind::Timeout));
    assert_eq!(kind(3), Some(FailureKind::SessionUnavailable));
    assert!(outcome.message().starts_with("Booking failed on every court"));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_candidates_run_once() {
    let engine = ScriptedEngine::new().with_court(1, taken()).with_court(2, taken());
    let pool = started_pool(&engine, &[1, 2]).await;
    let orchestrator = orchestrator(BookingExecutor::new(pool, ExecutorConfig::default()), 0);

    let outcome = orchestrator.book(&request(vec![2, 1, 2, 1])).await;

    assert_eq!(outcome.reports.len(), 2);
    assert_eq!(engine.counters(1).slot_lookups, 1);
    assert_eq!(engine.counters(2).slot_lookups, 1);

    let empty = orchestrator.book(&request(vec![])).await;
    assert!(empty.reports.is_empty());
    assert_eq!(empty.message(), "Booking failed: no candidate courts");
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_slow_courts() {
    let engine = ScriptedEngine::new().with_court(1, slow_navigation(Duration::from_secs(20)));
    let pool = started_pool(&engine, &[1]).await;
    let orchestrator = BookingOrchestrator::new(
        Arc::new(BookingExecutor::new(pool.clone(), ExecutorConfig::default())),
        OrchestratorConfig {
            booking_deadline_ms: 5_000,
            ..OrchestratorConfig::default()
        },
        FormRetryPolicy::from(&ExecutorConfig::default().form_retry),
    );

    let started = Instant::now();
    let outcome = orchestrator.book(&request(vec![1])).await;

    assert!(started.elapsed() < Duration::from_secs(6));
    assert!(!outcome.is_success());
    assert_eq!(outcome.reports[&1], CourtReport::Cancelled);
    assert!(!pool.is_critical_operation_in_progress());
}

#[tokio::test(start_paused = true)]
async fn test_form_submission_is_retried() {
    let engine = ScriptedEngine::new().with_court(
        1,
        CourtScript {
            submit_failures: 1,
            confirmation_id: Some("R2".to_string()),
            ..CourtScript::default()
        },
    );
    let pool = started_pool(&engine, &[1]).await;
    let orchestrator = orchestrator(BookingExecutor::new(pool, ExecutorConfig::default()), 2);

    let outcome = orchestrator.book(&request(vec![1])).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.confirmation_id(), Some("R2"));
    assert_eq!(engine.counters(1).submissions, 2);
}

#[tokio::test(start_paused = true)]
async fn test_form_failure_without_retries_is_reported() {
    let engine = ScriptedEngine::new().with_court(
        1,
        CourtScript {
            submit_failures: 1,
            ..CourtScript::default()
        },
    );
    let pool = started_pool(&engine, &[1]).await;
    let orchestrator = orchestrator(BookingExecutor::new(pool, ExecutorConfig::default()), 0);

    let outcome = orchestrator.book(&request(vec![1])).await;

    assert!(!outcome.is_success());
    assert_eq!(engine.counters(1).submissions, 1);
    assert!(matches!(
        &outcome.reports[&1],
        CourtReport::Completed { result } if result.failure_kind() == Some(FailureKind::FormSubmissionFailed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slot_that_never_appears_is_unavailable() {
    let engine = ScriptedEngine::new().with_court(
        1,
        CourtScript {
            slot: SlotScript::Never,
            ..CourtScript::default()
        },
    );
    let pool = started_pool(&engine, &[1]).await;
    let config = ExecutorConfig::default();
    let total = config.total_execution();
    let executor = BookingExecutor::new(pool.clone(), config).with_slot_retry(RetryPolicy::none());

    let started = Instant::now();
    let result = executor.execute(1, &request(vec![1])).await;

    assert!(started.elapsed() < total);
    assert_eq!(result.failure_kind(), Some(FailureKind::SlotUnavailable));
    assert_eq!(result.final_state, ExecutorState::Failed);
    assert_eq!(engine.counters(1).slot_lookups, 1);
    assert!(!pool.is_critical_operation_in_progress());
}

#[tokio::test(start_paused = true)]
async fn test_slot_found_after_reloads() {
    let engine = ScriptedEngine::new().with_court(
        1,
        CourtScript {
            slot: SlotScript::AppearsAfterReloads(2),
            ..CourtScript::default()
        },
    );
    let pool = started_pool(&engine, &[1]).await;
    let executor = BookingExecutor::new(pool, ExecutorConfig::default());

    let result = executor.execute(1, &request(vec![1])).await;

    assert!(result.is_success());
    let counters = engine.counters(1);
    assert_eq!(counters.reloads, 2);
    assert_eq!(counters.slot_lookups, 3);
}

#[tokio::test(start_paused = true)]
async fn test_executor_records_transitions() {
    let engine = ScriptedEngine::new().with_court(1, CourtScript::default());
    let pool = started_pool(&engine, &[1]).await;
    let recorder = Arc::new(StepRecorder::new());
    let executor = BookingExecutor::new(pool, ExecutorConfig::default()).with_hook(recorder.clone());

    let result = executor.execute(1, &request(vec![1])).await;

    assert_eq!(result.final_state, ExecutorState::Success);
    assert_eq!(
        recorder.states_for(1),
        vec![
            ExecutorState::ValidatingSession,
            ExecutorState::LocatingSlot,
            ExecutorState::SubmittingForm,
            ExecutorState::AwaitingConfirmation,
            ExecutorState::Success,
        ]
    );
    // Idle plus the four working states
    assert_eq!(result.timings.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_page_is_reset_after_attempt() {
    let engine = ScriptedEngine::new().with_court(1, CourtScript::default());
    let pool = started_pool(&engine, &[1]).await;
    let executor = BookingExecutor::new(pool.clone(), ExecutorConfig::default());

    let result = executor.execute(1, &request(vec![1])).await;
    assert!(result.is_success());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let session = pool.get_session(1).await.unwrap();
    assert!(session.is_positioned());
    assert!(!session.is_leased());
    assert_eq!(session.use_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_executor_surfaces_as_cancellation() {
    let engine = ScriptedEngine::new().with_court(1, slow_navigation(Duration::from_secs(10)));
    let pool = started_pool(&engine, &[1]).await;
    let executor = Arc::new(BookingExecutor::new(pool.clone(), ExecutorConfig::default()));

    let task = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute(1, &request(vec![1])).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(pool.is_critical_operation_in_progress());

    task.abort();
    let err = task.await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(!pool.is_critical_operation_in_progress());
    let session = pool.get_session(1).await.unwrap();
    assert!(!session.is_leased());
    assert!(!session.is_positioned());
}

#[tokio::test(start_paused = true)]
async fn test_service_entry_points() {
    let engine = ScriptedEngine::new().with_court(1, taken()).with_court(2, CourtScript::default());
    let pool = started_pool(&engine, &[1, 2]).await;
    let service = BookingService::new(
        pool.clone(),
        orchestrator(BookingExecutor::new(pool.clone(), ExecutorConfig::default()), 0),
        Arc::new(crate::availability::AvailabilityChecker::new(
            pool,
            crate::configuration::types::default_day_labels(),
            &OrchestratorConfig::default(),
        )),
    );

    let report = service.check_availability(&[]).await;
    assert_eq!(report.courts.keys().copied().collect::<Vec<_>>(), vec![1, 2]);

    let outcome = service.attempt_booking(&request(vec![1, 2])).await;
    assert_eq!(outcome.court(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_booking_waits_for_recycling_instead_of_recreating() {
    let engine = ScriptedEngine::new().with_court(1, slow_navigation(Duration::from_secs(3)));
    let pool = Arc::new(BrowserPool::new(
        Arc::new(engine.clone()),
        vec![1],
        PoolConfig {
            max_session_uses: 0,
            ..pool_config()
        },
    ));
    pool.start().await.unwrap();
    let executor = BookingExecutor::new(pool.clone(), ExecutorConfig::default());

    let recycling = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.recycle_stale().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let result = executor.execute(1, &request(vec![1])).await;

    assert!(result.is_success());
    assert_eq!(recycling.await.unwrap(), vec![1]);
    // the start page plus its recycled replacement, nothing discarded
    let counters = engine.counters(1);
    assert_eq!(counters.pages_opened, 2);
    assert_eq!(counters.pages_closed, 1);
}

fn fixed_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_hms_opt(7, 0, 0)
        .unwrap()
}

fn calendar(text: &str, times: &[&str]) -> CourtScript {
    CourtScript {
        calendar: CalendarSnapshot {
            text: text.to_string(),
            times: times.iter().map(|t| t.to_string()).collect(),
        },
        ..CourtScript::default()
    }
}

fn service(pool: &Arc<BrowserPool>) -> BookingService {
    BookingService::new(
        pool.clone(),
        orchestrator(BookingExecutor::new(pool.clone(), ExecutorConfig::default()), 0),
        Arc::new(
            AvailabilityChecker::new(pool.clone(), default_day_labels(), &OrchestratorConfig::default())
                .with_clock(fixed_now),
        ),
    )
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, minute, 0).unwrap()
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_service_slot_queries() {
    let engine = ScriptedEngine::new()
        .with_court(1, calendar("Hoy Mañana", &["18:00", "19:00", "08:00"]))
        .with_court(2, calendar("Hoy Mañana", &["09:00", "18:00", "08:00", "10:00"]))
        // no day heading: a flat listing
        .with_court(3, calendar("", &["06:00"]));
    let pool = started_pool(&engine, &[1, 2, 3]).await;
    let service = service(&pool);
    let today = fixed_now().date();
    let tomorrow = today.succ_opt().unwrap();

    assert_eq!(service.candidates_for(today, hm(18, 0)).await, vec![1, 2]);
    assert_eq!(service.candidates_for(tomorrow, hm(10, 0)).await, vec![2]);
    assert_eq!(service.candidates_for(tomorrow, hm(6, 0)).await, vec![3]);
    assert!(service.candidates_for(today, hm(12, 0)).await.is_empty());

    let slot = |court, date, time: &str| TimeSlotCandidate {
        court,
        date,
        time: time.to_string(),
    };
    let all = [1, 2, 3];
    let until_tomorrow = at(tomorrow, 23, 0);
    assert_eq!(
        service.next_available_slot(&all, fixed_now(), until_tomorrow).await,
        Some(slot(2, today, "09:00"))
    );
    // same time on two courts goes to the lower number
    assert_eq!(
        service.next_available_slot(&all, at(today, 12, 0), until_tomorrow).await,
        Some(slot(1, today, "18:00"))
    );
    assert_eq!(
        service.next_available_slot(&all, at(tomorrow, 0, 0), until_tomorrow).await,
        Some(slot(1, tomorrow, "08:00"))
    );
    // both ends of the window are inclusive
    assert_eq!(
        service.next_available_slot(&all, at(today, 9, 0), until_tomorrow).await,
        Some(slot(2, today, "09:00"))
    );
    assert_eq!(
        service.next_available_slot(&all, at(today, 10, 0), at(today, 18, 0)).await,
        Some(slot(1, today, "18:00"))
    );
    assert_eq!(
        service.next_available_slot(&all, at(today, 10, 0), at(today, 17, 59)).await,
        None
    );
    // a flat listing has no date to offer
    assert_eq!(service.next_available_slot(&[3], fixed_now(), until_tomorrow).await, None);

    assert!(service.is_slot_available(2, tomorrow, hm(10, 0)).await.unwrap());
    assert!(!service.is_slot_available(1, tomorrow, hm(10, 0)).await.unwrap());
    assert!(service.is_slot_available(3, today, hm(6, 0)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_booking_recovers_failed_candidate_first() {
    let engine = ScriptedEngine::new().with_court(1, CourtScript::default()).with_court(
        2,
        CourtScript {
            open_failures: 3,
            confirmation_id: Some("REC-2".to_string()),
            ..CourtScript::default()
        },
    );
    let pool = started_pool(&engine, &[1, 2]).await;
    assert_eq!(pool.get_available_courts().await, vec![1]);

    let outcome = service(&pool).attempt_booking(&request(vec![2])).await;

    assert_eq!(outcome.court(), Some(2));
    assert_eq!(outcome.confirmation_id(), Some("REC-2"));
    let stats = pool.stats().await;
    assert_eq!(stats.counters.recovery_successes, 1);
    assert_eq!(stats.counters.pool_restarts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_booking_does_not_wait_for_recovery_when_a_candidate_is_up() {
    let engine = ScriptedEngine::new().with_court(1, CourtScript::default()).with_court(
        2,
        CourtScript {
            open_failures: 3,
            ..CourtScript::default()
        },
    );
    let pool = started_pool(&engine, &[1, 2]).await;

    let outcome = service(&pool).attempt_booking(&request(vec![1, 2])).await;
    assert!(outcome.is_success());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(pool.is_fully_ready().await);
}
