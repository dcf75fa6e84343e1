// Module: Config
// Env-overridable run limits, following the teacher's `limits::ExecutionLimits`
// `from_env`/`strict`/`relaxed` convention.

use std::time::Duration;

/// Run-wide limits consumed by the loader and router.
#[derive(Debug, Clone)]
pub struct RunnerLimits {
    pub max_parallel: usize,
    pub max_include_depth: u32,
    pub max_scenarios: usize,
    pub attempt_timeout: Duration,
    pub cancellation_grace: Duration,
}

impl Default for RunnerLimits {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            max_include_depth: 5,
            max_scenarios: 500,
            attempt_timeout: Duration::from_secs(30),
            cancellation_grace: Duration::from_millis(500),
        }
    }
}

impl RunnerLimits {
    /// Reads `RUNNER_MAX_PARALLEL`, `RUNNER_MAX_INCLUDE_DEPTH`,
    /// `RUNNER_MAX_SCENARIOS`, `RUNNER_ATTEMPT_TIMEOUT_SECS` with fallback
    /// to `Default` on missing or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_parallel: env_usize("RUNNER_MAX_PARALLEL", defaults.max_parallel),
            max_include_depth: env_u32("RUNNER_MAX_INCLUDE_DEPTH", defaults.max_include_depth),
            max_scenarios: env_usize("RUNNER_MAX_SCENARIOS", defaults.max_scenarios),
            attempt_timeout: Duration::from_secs(env_u64(
                "RUNNER_ATTEMPT_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )),
            cancellation_grace: defaults.cancellation_grace,
        }
    }

    pub fn strict() -> Self {
        Self {
            max_parallel: 1,
            max_include_depth: 2,
            max_scenarios: 50,
            attempt_timeout: Duration::from_secs(10),
            cancellation_grace: Duration::from_millis(200),
        }
    }

    pub fn relaxed() -> Self {
        Self {
            max_parallel: 32,
            max_include_depth: 10,
            max_scenarios: 5000,
            attempt_timeout: Duration::from_secs(120),
            cancellation_grace: Duration::from_secs(2),
        }
    }
}

fn env_usize(key: &str, fallback: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_u32(key: &str, fallback: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn env_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let limits = RunnerLimits::default();
        assert_eq!(limits.max_parallel, 10);
        assert_eq!(limits.max_include_depth, 5);
    }

    #[test]
    fn strict_is_tighter_than_relaxed() {
        let strict = RunnerLimits::strict();
        let relaxed = RunnerLimits::relaxed();
        assert!(strict.max_parallel < relaxed.max_parallel);
        assert!(strict.max_include_depth < relaxed.max_include_depth);
    }
}
