// Three-state circuit breaker: CLOSED / OPEN / HALF_OPEN.
//
// No teacher counterpart exists (the reference runner has no breaker); the
// state machine and metrics are built directly from SPEC_FULL.md §4.A,
// kept in the same module-plus-`#[cfg(test)]` shape as `retry::mod`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::errors::{ErrorCode, OrchestratorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
    pub is_failure: Arc<dyn Fn(&OrchestratorError) -> bool + Send + Sync>,
    pub on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_close: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 1,
            is_failure: Arc::new(|_| true),
            on_open: None,
            on_close: None,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
}

/// Monotone call counters, safe to read concurrently with `Ordering::Relaxed`.
#[derive(Default)]
pub struct CircuitMetrics {
    pub total_calls: AtomicU64,
    pub total_failures: AtomicU64,
    pub total_successes: AtomicU64,
    pub state_changes: AtomicU64,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    pub metrics: CircuitMetrics,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_time: None,
            }),
            metrics: CircuitMetrics::default(),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Runs `op` through the breaker. Rejects immediately with
    /// `OrchestratorError::CircuitOpen` while OPEN and the reset timeout
    /// has not elapsed.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, OrchestratorError>>,
    {
        {
            let mut guard = self.inner.lock().await;
            if guard.state == CircuitState::Open {
                let elapsed_ok = guard
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(false);
                if elapsed_ok {
                    guard.state = CircuitState::HalfOpen;
                    guard.consecutive_successes = 0;
                    self.metrics.state_changes.fetch_add(1, Ordering::Relaxed);
                } else {
                    return Err(OrchestratorError::CircuitOpen(ErrorCode::CIRCUIT_OPEN));
                }
            }
        }

        self.metrics.total_calls.fetch_add(1, Ordering::Relaxed);
        let result = op().await;

        let mut guard = self.inner.lock().await;
        match &result {
            Ok(_) => {
                self.metrics.total_successes.fetch_add(1, Ordering::Relaxed);
                self.on_success(&mut guard);
            }
            Err(err) => {
                if (self.config.is_failure)(err) {
                    self.metrics.total_failures.fetch_add(1, Ordering::Relaxed);
                    self.on_failure(&mut guard);
                } else {
                    self.on_success(&mut guard);
                }
            }
        }
        result
    }

    fn on_success(&self, guard: &mut Inner) {
        match guard.state {
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = CircuitState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    self.metrics.state_changes.fetch_add(1, Ordering::Relaxed);
                    if let Some(cb) = &self.config.on_close {
                        cb();
                    }
                }
            }
            CircuitState::Closed => {
                guard.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, guard: &mut Inner) {
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.last_failure_time = Some(Instant::now());
                    self.metrics.state_changes.fetch_add(1, Ordering::Relaxed);
                    if let Some(cb) = &self.config.on_open {
                        cb();
                    }
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.last_failure_time = Some(Instant::now());
                guard.consecutive_successes = 0;
                self.metrics.state_changes.fetch_add(1, Ordering::Relaxed);
                if let Some(cb) = &self.config.on_open {
                    cb();
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
            success_threshold: 1,
            is_failure: Arc::new(|_| true),
            on_open: None,
            on_close: None,
        }
    }

    #[tokio::test]
    async fn trips_open_after_threshold_e4() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50)));
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(OrchestratorError::transient_io("boom")) })
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        // third call: rejected without invoking op
        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let i = invoked.clone();
        let result = breaker
            .call(|| async move {
                i.store(true, Ordering::SeqCst);
                Ok::<(), OrchestratorError>(())
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::CircuitOpen(_))));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success_e4() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50)));
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(OrchestratorError::transient_io("boom")) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        let result = breaker.call(|| async { Ok::<(), OrchestratorError>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_millis(20)));
        let _ = breaker
            .call(|| async { Err::<(), _>(OrchestratorError::transient_io("boom")) })
            .await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = breaker
            .call(|| async { Err::<(), _>(OrchestratorError::transient_io("still broken")) })
            .await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn metrics_are_monotone() {
        let breaker = CircuitBreaker::new(config(10, Duration::from_millis(50)));
        let _ = breaker.call(|| async { Ok::<(), OrchestratorError>(()) }).await;
        let _ = breaker
            .call(|| async { Err::<(), _>(OrchestratorError::transient_io("boom")) })
            .await;
        assert_eq!(breaker.metrics.total_calls.load(Ordering::Relaxed), 2);
        assert_eq!(breaker.metrics.total_successes.load(Ordering::Relaxed), 1);
        assert_eq!(breaker.metrics.total_failures.load(Ordering::Relaxed), 1);
    }
}
