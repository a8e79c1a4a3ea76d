use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::browser_pool::{spawn_maintenance, BrowserPool, HealthStatus, RecoveryStrategy};
use crate::configuration::types::{CourtNumber, PoolConfig, RetrySettings};
use crate::error_handling::types::{PoolError, SiteError};
use crate::site::scripted_site::{CourtScript, ScriptedEngine};

fn fast_config() -> PoolConfig {
    PoolConfig {
        stagger_ms: 0,
        warmup_ms: 0,
        create_retry: RetrySettings {
            max_retries: 2,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
        },
        liveness_timeout_ms: 500,
        navigation_timeout_ms: 2_000,
        shutdown_wait_secs: 300,
        refresh_interval_secs: 60,
        max_session_age_secs: 3_600,
        max_session_uses: 3,
        recovery_timeout_secs: 60,
    }
}

fn engine(courts: &[CourtNumber]) -> ScriptedEngine {
    courts
        .iter()
        .fold(ScriptedEngine::new(), |e, c| e.with_court(*c, CourtScript::default()))
}

fn pool(engine: &ScriptedEngine, courts: &[CourtNumber], config: PoolConfig) -> Arc<BrowserPool> {
    Arc::new(BrowserPool::new(
        Arc::new(engine.clone()),
        courts.to_vec(),
        config,
    ))
}

fn failing(open_failures: u32) -> CourtScript {
    CourtScript {
        open_failures,
        ..CourtScript::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_fails_when_every_court_fails() {
    let engine = ScriptedEngine::new()
        .with_court(1, failing(10))
        .with_court(2, failing(10))
        .with_court(3, failing(10));
    let pool = pool(&engine, &[1, 2, 3], fast_config());

    let result = pool.start().await;

    assert!(matches!(result, Err(PoolError::NoCourtsReady(3, 3))));
    assert!(!pool.is_ready().await);
    assert_eq!(engine.shutdowns(), 1);
    // one attempt plus two retries per court
    assert_eq!(engine.counters(2).open_attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_start_tolerates_partial_failure() {
    let engine = ScriptedEngine::new()
        .with_court(1, CourtScript::default())
        .with_court(2, failing(10))
        .with_court(3, CourtScript::default());
    let pool = pool(&engine, &[1, 2, 3], fast_config());

    pool.start().await.unwrap();

    assert!(pool.is_ready().await);
    assert!(pool.is_partially_ready().await);
    assert!(!pool.is_fully_ready().await);
    assert_eq!(pool.get_available_courts().await, vec![1, 3]);
    assert!(pool.get_session(2).await.is_none());

    let health = pool.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.message, "Pool partially initialized: 2/3 courts");
}

#[tokio::test(start_paused = true)]
async fn test_start_retries_session_creation() {
    let engine = ScriptedEngine::new()
        .with_court(1, failing(2))
        .with_court(2, CourtScript::default());
    let pool = pool(&engine, &[1, 2], fast_config());

    pool.start().await.unwrap();

    assert!(pool.is_fully_ready().await);
    assert_eq!(engine.counters(1).open_attempts, 3);
    assert_eq!(engine.counters(2).open_attempts, 1);
    assert_eq!(pool.stats().await.counters.sessions_created, 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_staggers_launches() {
    let engine = engine(&[1, 2, 3]);
    let config = PoolConfig {
        stagger_ms: 1_500,
        ..fast_config()
    };
    let pool = pool(&engine, &[1, 2, 3], config);

    let started = Instant::now();
    pool.start().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(3_000));
    assert!(matches!(pool.start().await, Err(PoolError::AlreadyStarted)));
}

#[tokio::test(start_paused = true)]
async fn test_get_session_is_idempotent_when_healthy() {
    let engine = engine(&[1]);
    let pool = pool(&engine, &[1], fast_config());
    pool.start().await.unwrap();

    let first = pool.get_session(1).await.unwrap();
    let second = pool.get_session(1).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.counters(1).pages_opened, 1);
    assert!(pool.get_session(9).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_get_session_recreates_after_failed_liveness_check() {
    let engine = engine(&[1]);
    let pool = pool(&engine, &[1], fast_config());
    pool.start().await.unwrap();
    let original = pool.get_session(1).await.unwrap();

    engine.fail_liveness_checks(1, 1);
    let replacement = pool.get_session(1).await.unwrap();

    assert!(!Arc::ptr_eq(&original, &replacement));
    let counters = engine.counters(1);
    assert_eq!(counters.pages_opened, 2);
    assert_eq!(counters.pages_closed, 1);
    assert_eq!(pool.stats().await.counters.sessions_recreated, 1);
}

#[tokio::test(start_paused = true)]
async fn test_recover_court_brings_back_failed_court() {
    let engine = ScriptedEngine::new()
        .with_court(1, CourtScript::default())
        .with_court(2, failing(3));
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();
    assert_eq!(pool.get_available_courts().await, vec![1]);

    assert!(pool.recover_court(2).await);
    assert!(pool.is_fully_ready().await);
    assert!(!pool.recover_court(7).await);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_critical_operation() {
    let engine = engine(&[1, 2]);
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();
    pool.set_critical_operation(true);

    let started = Instant::now();
    let stopping = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.stop().await })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!stopping.is_finished());
    assert_eq!(engine.counters(1).pages_closed, 0);
    assert_eq!(engine.counters(2).pages_closed, 0);

    pool.set_critical_operation(false);
    let report = stopping.await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(report.waited_for_critical);
    assert!(!report.critical_wait_timed_out);
    assert_eq!(report.sessions_closed, 2);
    assert_eq!(engine.counters(1).pages_closed, 1);
    assert!(!pool.is_ready().await);
}

#[tokio::test(start_paused = true)]
async fn test_stop_wait_is_bounded() {
    let engine = engine(&[1]);
    let config = PoolConfig {
        shutdown_wait_secs: 10,
        ..fast_config()
    };
    let pool = pool(&engine, &[1], config);
    pool.start().await.unwrap();
    let _guard = pool.begin_critical_operation();

    let started = Instant::now();
    let report = pool.stop().await;

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(report.critical_wait_timed_out);
    assert_eq!(engine.counters(1).pages_closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_swallows_teardown_errors() {
    let engine = ScriptedEngine::new()
        .with_court(
            1,
            CourtScript {
                close_error: Some(SiteError::Disconnected("Target closed".to_string())),
                ..CourtScript::default()
            },
        )
        .with_court(
            2,
            CourtScript {
                close_error: Some(SiteError::WebDriver("browser crashed".to_string())),
                ..CourtScript::default()
            },
        );
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let report = pool.stop().await;

    assert!(!report.waited_for_critical);
    assert_eq!(report.sessions_closed, 1);
    assert_eq!(report.errors_swallowed, 2);
    assert_eq!(engine.shutdowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_skipped_during_critical_operation() {
    let engine = engine(&[1, 2]);
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let guard = pool.begin_critical_operation();
    let report = pool.refresh_all().await;
    assert_eq!(report.skipped, vec![1, 2]);
    assert_eq!(engine.counters(1).reloads, 0);

    drop(guard);
    let report = pool.refresh_all().await;
    assert_eq!(report.refreshed, vec![1, 2]);
    assert_eq!(engine.counters(1).reloads, 1);
    assert_eq!(pool.stats().await.counters.refresh_successes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_skips_leased_and_repositions_dirty_sessions() {
    let engine = engine(&[1, 2]);
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let session = pool.get_session(1).await.unwrap();
    let mut lease = session.lease().await;
    let report = pool.refresh_all().await;
    assert_eq!(report.skipped, vec![1]);
    assert_eq!(report.refreshed, vec![2]);

    lease.mark_dirty();
    drop(lease);
    assert!(!session.is_positioned());

    let report = pool.refresh_all().await;
    assert_eq!(report.repositioned, vec![1]);
    assert!(session.is_positioned());
    // initial navigation plus the repositioning
    assert_eq!(engine.counters(1).navigations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_recycle_stale_replaces_overused_sessions() {
    let engine = engine(&[1, 2]);
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let worn = pool.get_session(1).await.unwrap();
    for _ in 0..3 {
        let _lease = worn.lease().await;
    }
    assert_eq!(worn.use_count(), 3);

    let recycled = pool.recycle_stale().await;

    assert_eq!(recycled, vec![1]);
    let fresh = pool.get_session(1).await.unwrap();
    assert!(!Arc::ptr_eq(&worn, &fresh));
    assert_eq!(fresh.use_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recycle_stale_by_age() {
    let engine = engine(&[1]);
    let config = PoolConfig {
        max_session_age_secs: 60,
        ..fast_config()
    };
    let pool = pool(&engine, &[1], config);
    pool.start().await.unwrap();

    assert!(pool.recycle_stale().await.is_empty());
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(pool.recycle_stale().await, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_loop_refreshes_and_stops_with_pool() {
    let engine = engine(&[1]);
    let pool = pool(&engine, &[1], fast_config());
    pool.start().await.unwrap();

    let handle = spawn_maintenance(pool.clone(), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(125)).await;
    assert_eq!(engine.counters(1).reloads, 2);

    pool.stop().await;
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("maintenance task should end")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_court_health_grades_checks() {
    let engine = engine(&[1]);
    let pool = pool(&engine, &[1], fast_config());
    pool.start().await.unwrap();

    let health = pool.court_health(1).await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.page_accessible);

    let missing = pool.court_health(5).await;
    assert_eq!(missing.status, HealthStatus::Failed);

    let status = pool.health().await;
    assert_eq!(status.status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_bounded_when_teardown_hangs() {
    let engine = ScriptedEngine::new()
        .with_court(
            1,
            CourtScript {
                close_hangs: true,
                ..CourtScript::default()
            },
        )
        .with_court(2, CourtScript::default())
        .with_hanging_shutdown();
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let started = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(3_600), pool.stop())
        .await
        .expect("stop should not wait on a wedged page");

    // one navigation budget for the page, one for the engine
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.sessions_closed, 1);
    assert_eq!(report.errors_swallowed, 2);
    assert_eq!(engine.counters(2).pages_closed, 1);
    assert!(!pool.is_ready().await);
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_ready_before_and_after_start() {
    let engine = ScriptedEngine::new().with_court(
        1,
        CourtScript {
            navigation_delay: Duration::from_secs(1),
            ..CourtScript::default()
        },
    );
    let pool = pool(&engine, &[1], fast_config());

    assert!(!pool.wait_until_ready(Duration::from_secs(1)).await);

    let starting = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.start().await })
    };
    let started = Instant::now();
    assert!(pool.wait_until_ready(Duration::from_secs(5)).await);
    assert!(started.elapsed() >= Duration::from_secs(1));
    starting.await.unwrap().unwrap();

    pool.stop().await;
    assert!(!pool.wait_until_ready(Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn test_recover_failed_brings_back_court_missing_since_start() {
    let engine = ScriptedEngine::new()
        .with_court(1, CourtScript::default())
        .with_court(2, failing(3));
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();
    assert_eq!(pool.failed_courts().await, vec![2]);

    let result = pool.recover_failed("court 2 missing").await.unwrap();

    assert!(result.success);
    assert_eq!(result.strategy_used, Some(RecoveryStrategy::IndividualCourt));
    assert_eq!(result.courts_recovered, vec![2]);
    assert!(pool.is_fully_ready().await);
    assert!(pool.recover_failed("nothing to do").await.is_none());

    let stats = pool.stats().await;
    assert_eq!(stats.counters.recovery_attempts, 1);
    assert_eq!(stats.counters.recovery_successes, 1);
    assert_eq!(stats.recent_recoveries.len(), 1);
    assert_eq!(stats.recent_recoveries[0].courts_affected, vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_escalates_to_partial_pool() {
    let engine = ScriptedEngine::new()
        .with_court(1, CourtScript::default())
        .with_court(2, failing(6));
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let result = pool.recover(Some(vec![2]), "court 2 missing").await;

    assert!(result.success);
    assert_eq!(result.strategy_used, Some(RecoveryStrategy::PartialPool));
    assert_eq!(result.attempts.len(), 2);
    assert!(!result.attempts[0].success);
    assert_eq!(result.attempts[0].strategy, RecoveryStrategy::IndividualCourt);
    assert_eq!(pool.get_available_courts().await, vec![1, 2]);
    // the healthy court kept its first page
    assert_eq!(engine.counters(1).pages_opened, 1);
    assert_eq!(pool.stats().await.counters.pool_restarts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_without_sessions_is_restarted() {
    let engine = engine(&[1]);
    let pool = pool(&engine, &[1], fast_config());
    pool.start().await.unwrap();

    engine.fail_liveness_checks(1, 1);
    engine.fail_opens(1, 3);
    assert!(pool.get_session(1).await.is_none());
    assert!(!pool.is_ready().await);

    let result = pool.recover_failed("pool lost every court").await.unwrap();

    assert!(result.success);
    assert_eq!(result.strategy_used, Some(RecoveryStrategy::FullRestart));
    assert!(pool.is_fully_ready().await);
    assert_eq!(engine.launches(), 2);
    assert_eq!(engine.shutdowns(), 1);
    assert_eq!(pool.stats().await.counters.pool_restarts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_waits_for_critical_operation() {
    let engine = ScriptedEngine::new()
        .with_court(1, CourtScript::default())
        .with_court(2, failing(3));
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();

    let guard = pool.begin_critical_operation();
    assert!(pool.recover_failed("during booking").await.is_none());
    assert!(matches!(pool.restart().await, Err(PoolError::CriticalOperation)));
    assert_eq!(pool.get_available_courts().await, vec![1]);

    drop(guard);
    assert!(pool.recover_failed("after booking").await.unwrap().success);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_loop_recovers_failed_courts() {
    let engine = ScriptedEngine::new()
        .with_court(1, CourtScript::default())
        .with_court(2, failing(3));
    let pool = pool(&engine, &[1, 2], fast_config());
    pool.start().await.unwrap();
    assert!(pool.is_partially_ready().await);

    let handle = spawn_maintenance(pool.clone(), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(65)).await;

    assert!(pool.is_fully_ready().await);
    assert_eq!(pool.stats().await.counters.recovery_successes, 1);

    pool.stop().await;
    handle.await.unwrap();
}
