// Module: Retry engine
// Generalizes the teacher's inline `execute_step_with_retry` loop and
// `retry::RetryExecutor` into the pluggable-strategy, jittered,
// timeout-racing contract SPEC_FULL.md §4.A requires.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::errors::{ErrorCode, OrchestratorError};

/// Backoff strategy for the delay before attempt `N` (`N >= 2`).
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    Fixed,
    Exponential { multiplier: f64 },
    Linear,
    Custom(std::sync::Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential { multiplier: 2.0 }
    }
}

/// Retry options, mirroring SPEC_FULL.md §4.A's option set.
#[derive(Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// `jitter in [0, 1]`; the realized delay is jittered by
    /// `+-(jitter * delay) / 2`.
    pub jitter: f64,
    pub attempt_timeout: Option<Duration>,
    /// Consulted after each failure; returning `false` halts retries
    /// immediately. Defaults to `OrchestratorError::is_retryable_by_default`.
    pub should_retry: std::sync::Arc<dyn Fn(&OrchestratorError, u32) -> bool + Send + Sync>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(0),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::default(),
            jitter: 0.0,
            attempt_timeout: None,
            should_retry: std::sync::Arc::new(|err, _attempt| err.is_retryable_by_default()),
        }
    }
}

/// Per-attempt detail, accumulated into `RetryState`.
#[derive(Debug, Clone)]
pub struct AttemptDetail {
    pub attempt: u32,
    pub delay_before: Duration,
    pub succeeded: bool,
}

/// `RetryState` per SPEC_FULL.md §3: `{attempts, totalTime, attemptDetails}`.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub total_time: Duration,
    pub attempt_details: Vec<AttemptDetail>,
}

/// Computes the raw (pre-jitter, pre-clamp) delay before attempt `attempt`
/// (`attempt >= 2`) under `strategy`.
fn raw_delay(strategy: &BackoffStrategy, initial_delay: Duration, attempt: u32) -> Duration {
    match strategy {
        BackoffStrategy::Fixed => initial_delay,
        BackoffStrategy::Exponential { multiplier } => {
            let factor = multiplier.powi((attempt - 1) as i32);
            Duration::from_secs_f64(initial_delay.as_secs_f64() * factor)
        }
        BackoffStrategy::Linear => Duration::from_secs_f64(initial_delay.as_secs_f64() * attempt as f64),
        BackoffStrategy::Custom(f) => f(attempt),
    }
}

/// Clamps to `max_delay`, applies `+-(jitter*delay)/2`, floors at 0, rounds
/// to the nearest millisecond. `rng` is injected so tests can assert exact
/// values with `jitter = 0`.
fn apply_jitter(delay: Duration, max_delay: Duration, jitter: f64, rng: &mut impl Rng) -> Duration {
    let clamped = delay.min(max_delay);
    if jitter <= 0.0 {
        return Duration::from_millis(clamped.as_millis() as u64);
    }
    let millis = clamped.as_secs_f64() * 1000.0;
    let spread = jitter * millis / 2.0;
    let offset = rng.gen_range(-spread..=spread);
    let jittered = (millis + offset).max(0.0).round();
    Duration::from_millis(jittered as u64)
}

/// Computes the fully-resolved delay before `attempt` (`attempt >= 2`).
pub fn delay_for_attempt(opts: &RetryOptions, attempt: u32) -> Duration {
    let mut rng = rand::thread_rng();
    let raw = raw_delay(&opts.strategy, opts.initial_delay, attempt - 1);
    apply_jitter(raw, opts.max_delay, opts.jitter, &mut rng)
}

/// Runs `op` under `opts`, retrying on failure per the configured strategy.
///
/// `on_retry(attempt, delay)` fires before each retried attempt (not the
/// first); `on_failure(err)` fires once, after all attempts are exhausted
/// or `should_retry` halts early.
pub async fn execute<T, F, Fut>(
    opts: &RetryOptions,
    mut on_retry: impl FnMut(u32, Duration),
    mut on_failure: impl FnMut(&OrchestratorError),
    mut op: F,
) -> Result<(T, RetryState), OrchestratorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let mut state = RetryState::default();
    let started = Instant::now();
    let mut last_err: Option<OrchestratorError> = None;

    for attempt in 1..=opts.max_attempts {
        let delay_before = if attempt == 1 {
            Duration::ZERO
        } else {
            let d = delay_for_attempt(opts, attempt);
            tokio::time::sleep(d).await;
            on_retry(attempt, d);
            d
        };

        let attempt_result = match opts.attempt_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(r) => r,
                Err(_) => Err(OrchestratorError::timeout(
                    ErrorCode::ATTEMPT_TIMEOUT,
                    format!("attempt {attempt} timed out after {:?}", timeout),
                )),
            },
            None => op(attempt).await,
        };

        state.attempts = attempt;
        match attempt_result {
            Ok(value) => {
                state.attempt_details.push(AttemptDetail {
                    attempt,
                    delay_before,
                    succeeded: true,
                });
                state.total_time = started.elapsed();
                return Ok((value, state));
            }
            Err(err) => {
                state.attempt_details.push(AttemptDetail {
                    attempt,
                    delay_before,
                    succeeded: false,
                });
                let retry = (opts.should_retry)(&err, attempt);
                last_err = Some(err);
                if !retry || attempt == opts.max_attempts {
                    break;
                }
            }
        }
    }

    state.total_time = started.elapsed();
    let err = last_err.unwrap_or_else(|| {
        OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, "retry loop exited with no error")
    });
    on_failure(&err);
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn opts(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            jitter: 0.0,
            attempt_timeout: None,
            should_retry: Arc::new(|err, _| err.is_retryable_by_default()),
        }
    }

    #[test]
    fn exponential_delay_matches_formula_within_1ms() {
        let o = opts(5);
        // invariant 3: delay before attempt k (k>=2) = min(d0*m^(k-2), maxDelay)
        assert_eq!(delay_for_attempt(&o, 2), Duration::from_millis(10));
        assert_eq!(delay_for_attempt(&o, 3), Duration::from_millis(20));
        assert_eq!(delay_for_attempt(&o, 4), Duration::from_millis(40));
    }

    #[test]
    fn delay_clamps_to_max_delay() {
        let mut o = opts(5);
        o.max_delay = Duration::from_millis(15);
        assert_eq!(delay_for_attempt(&o, 4), Duration::from_millis(15));
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_delay() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let (value, state) = execute(
            &opts(3),
            |_, _| {},
            |_| {},
            move |_attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, OrchestratorError>(42)
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(state.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds_e3() {
        // E3: op fails twice then succeeds, exponential 10/20 initial.
        let counter = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(std::sync::Mutex::new(Vec::new()));
        let c = counter.clone();
        let r = retries.clone();
        let (value, state) = execute(
            &opts(3),
            move |attempt, delay| r.lock().unwrap().push((attempt, delay)),
            |_| {},
            move |_attempt| {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(OrchestratorError::transient_io("boom"))
                    } else {
                        Ok::<_, OrchestratorError>(())
                    }
                }
            },
        )
        .await
        .unwrap();
        let _ = value;
        assert_eq!(state.attempts, 3);
        let retries = retries.lock().unwrap();
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].1, Duration::from_millis(10));
        assert_eq!(retries[1].1, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn should_retry_false_halts_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let mut o = opts(5);
        o.should_retry = Arc::new(|_, _| false);
        let result = execute(
            &o,
            |_, _| {},
            |_| {},
            move |_attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(OrchestratorError::transient_io("boom"))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_timeout_counts_as_failure() {
        let o = RetryOptions {
            attempt_timeout: Some(Duration::from_millis(5)),
            ..opts(2)
        };
        let result = execute(
            &o,
            |_, _| {},
            |_| {},
            |_attempt| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), OrchestratorError>(())
            },
        )
        .await;
        assert!(result.is_err());
    }
}
