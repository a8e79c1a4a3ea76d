//! Critical-operation tracking.
//!
//! A critical operation is a booking in flight. While one is in progress the
//! pool's background maintenance leaves every session alone and `stop` waits
//! (bounded) before closing anything.
//!
//! Two mechanisms feed the same state:
//! - an explicit latch, `set_critical_operation(true/false)`
//! - RAII guards from `begin_critical_operation()`, one per executor
//!
//! The operation is in progress while the latch is set or any guard is alive,
//! so one executor finishing never clears the flag under a sibling.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CriticalState {
    latched: bool,
    active: usize,
}

impl CriticalState {
    fn in_progress(&self) -> bool {
        self.latched || self.active > 0
    }
}

#[derive(Debug, Clone)]
pub struct CriticalOperations {
    state: Arc<watch::Sender<CriticalState>>,
}

impl Default for CriticalOperations {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalOperations {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CriticalState::default());
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn set_latch(&self, latched: bool) {
        self.state.send_modify(|s| s.latched = latched);
    }

    pub fn begin(&self) -> CriticalOperationGuard {
        self.state.send_modify(|s| s.active += 1);
        CriticalOperationGuard {
            state: self.state.clone(),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.state.borrow().in_progress()
    }

    pub fn active(&self) -> usize {
        self.state.borrow().active
    }

    /// Waits until no critical operation is in progress. Returns `false` when
    /// `limit` elapsed first.
    pub async fn wait_until_clear(&self, limit: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let wait = async move {
            loop {
                if !rx.borrow_and_update().in_progress() {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }
}

/// Keeps a critical operation open until dropped, including when the owning
/// task is cancelled.
#[derive(Debug)]
pub struct CriticalOperationGuard {
    state: Arc<watch::Sender<CriticalState>>,
}

impl Drop for CriticalOperationGuard {
    fn drop(&mut self) {
        self.state
            .send_modify(|s| s.active = s.active.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_and_latch_combine() {
        let critical = CriticalOperations::new();
        assert!(!critical.in_progress());

        let first = critical.begin();
        let second = critical.begin();
        assert_eq!(critical.active(), 2);

        drop(first);
        assert!(critical.in_progress());
        drop(second);
        assert!(!critical.in_progress());

        critical.set_latch(true);
        let guard = critical.begin();
        drop(guard);
        assert!(critical.in_progress());
        critical.set_latch(false);
        assert!(!critical.in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_clear_is_bounded() {
        let critical = CriticalOperations::new();
        critical.set_latch(true);

        assert!(!critical.wait_until_clear(Duration::from_secs(1)).await);

        let clearer = critical.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            clearer.set_latch(false);
        });
        assert!(critical.wait_until_clear(Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn guard_released_when_task_is_aborted() {
        let critical = CriticalOperations::new();
        let inner = critical.clone();
        let task = tokio::spawn(async move {
            let _guard = inner.begin();
            std::future::pending::<()>().await;
        });

        tokio::task::yield_now().await;
        while critical.active() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(!critical.in_progress());
    }
}
