// Output stabilization and regex pattern-wait. Both poll every 100ms;
// stabilization requires five consecutive identical buffer lengths,
// pattern-wait resolves on the first case-insensitive match. Built from
// SPEC_FULL.md §4.E.3; no teacher counterpart.

use std::time::Duration;

use regex::RegexBuilder;

use crate::errors::{ErrorCode, OrchestratorError};
use crate::pty::OutputBuffer;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STABLE_POLLS_REQUIRED: u32 = 5;

/// Polls `buffer`'s length every 100ms; declares stable after 5
/// consecutive identical lengths. Fails with `StabilizationTimeout` if
/// `timeout` elapses first.
pub async fn stabilize(buffer: &OutputBuffer, timeout: Duration) -> Result<(), OrchestratorError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_len = buffer.len();
    let mut stable_count = 0u32;

    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(OrchestratorError::timeout(ErrorCode::STABILIZATION_TIMEOUT, "output did not stabilize in time"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
        let len = buffer.len();
        if len == last_len {
            stable_count += 1;
            if stable_count >= STABLE_POLLS_REQUIRED {
                return Ok(());
            }
        } else {
            stable_count = 0;
            last_len = len;
        }
    }
}

/// Polls the buffer's latest text every 100ms, resolving on the first
/// case-insensitive match of `pattern`. Fails with `PatternTimeout`.
pub async fn wait_for_pattern(buffer: &OutputBuffer, pattern: &str, timeout: Duration) -> Result<String, OrchestratorError> {
    let re = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("invalid pattern '{pattern}': {e}")))?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let text = buffer.latest_text();
        if let Some(m) = re.find(&text) {
            return Ok(m.as_str().to_string());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OrchestratorError::timeout(ErrorCode::PATTERN_TIMEOUT, format!("pattern '{pattern}' not observed in time")));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
