// Module: Errors
// Structured error taxonomy for the orchestrator, plus a grep-able numeric
// code attached to every variant (category = leading digit).

use std::fmt;

/// Numeric error code in the style `E{category}{sequence}`.
///
/// Categories: 1xxx config, 2xxx usage, 3xxx transient I/O, 4xxx
/// timeout/circuit/cancellation, 5xxx fatal system errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const INVALID_SCENARIO: ErrorCode = ErrorCode(1001);
    pub const PATH_TRAVERSAL: ErrorCode = ErrorCode(1002);
    pub const CIRCULAR_INCLUDE: ErrorCode = ErrorCode(1003);
    pub const INCLUDE_TOO_DEEP: ErrorCode = ErrorCode(1004);
    pub const MISSING_REQUIRED_FIELD: ErrorCode = ErrorCode(1005);
    pub const UNSUPPORTED_ENUM_VALUE: ErrorCode = ErrorCode(1006);

    pub const UNSUPPORTED_ACTION: ErrorCode = ErrorCode(2001);
    pub const NO_AGENT_FOR_INTERFACE: ErrorCode = ErrorCode(2002);
    pub const UNSUPPORTED_VALIDATION: ErrorCode = ErrorCode(2003);

    pub const STREAM_IO: ErrorCode = ErrorCode(3001);
    pub const CONNECT_FAILED: ErrorCode = ErrorCode(3002);

    pub const ATTEMPT_TIMEOUT: ErrorCode = ErrorCode(4001);
    pub const STABILIZATION_TIMEOUT: ErrorCode = ErrorCode(4002);
    pub const PATTERN_TIMEOUT: ErrorCode = ErrorCode(4003);
    pub const CIRCUIT_OPEN: ErrorCode = ErrorCode(4004);
    pub const CANCELLED: ErrorCode = ErrorCode(4005);

    pub const SPAWN_FAILED: ErrorCode = ErrorCode(5001);
    pub const PTY_UNAVAILABLE: ErrorCode = ErrorCode(5002);

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    pub fn category(&self) -> &'static str {
        match self.0 / 1000 {
            1 => "config",
            2 => "usage",
            3 => "transient-io",
            4 => "timeout-or-circuit",
            5 => "fatal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

/// Closed error taxonomy. Variants map to the "kinds" enumerated in the
/// error-handling design: which ones are retried, which one aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("[{0}] config error: {1}")]
    Config(ErrorCode, String),

    #[error("[{0}] usage error: {1}")]
    Usage(ErrorCode, String),

    #[error("[{0}] transient I/O error: {1}")]
    TransientIo(ErrorCode, String),

    #[error("[{0}] timeout: {1}")]
    Timeout(ErrorCode, String),

    #[error("[{0}] circuit open")]
    CircuitOpen(ErrorCode),

    #[error("[{0}] cancelled")]
    Cancelled(ErrorCode),

    #[error("[{0}] fatal system error: {1}")]
    FatalSystem(ErrorCode, String),
}

impl OrchestratorError {
    pub fn config(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Config(code, message.into())
    }

    pub fn usage(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Usage(code, message.into())
    }

    pub fn transient_io(message: impl Into<String>) -> Self {
        Self::TransientIo(ErrorCode::STREAM_IO, message.into())
    }

    pub fn timeout(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Timeout(code, message.into())
    }

    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::FatalSystem(code, message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(c, _)
            | Self::Usage(c, _)
            | Self::TransientIo(c, _)
            | Self::Timeout(c, _)
            | Self::CircuitOpen(c)
            | Self::Cancelled(c)
            | Self::FatalSystem(c, _) => *c,
        }
    }

    /// Whether the retry engine should attempt this error again by
    /// default. `CircuitOpen` and `Cancelled` are never retried, and a
    /// `Config` error is dropped at load time rather than retried; the
    /// caller's `shouldRetry` predicate can still override any of this.
    pub fn is_retryable_by_default(&self) -> bool {
        !matches!(self, Self::CircuitOpen(_) | Self::Cancelled(_) | Self::Config(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_leading_zeros() {
        assert_eq!(ErrorCode::PATH_TRAVERSAL.formatted(), "E1002");
    }

    #[test]
    fn categorizes_by_leading_digit() {
        assert_eq!(ErrorCode::CIRCUIT_OPEN.category(), "timeout-or-circuit");
        assert_eq!(ErrorCode::SPAWN_FAILED.category(), "fatal");
    }

    #[test]
    fn circuit_open_and_cancelled_are_not_retryable() {
        let open = OrchestratorError::CircuitOpen(ErrorCode::CIRCUIT_OPEN);
        let cancelled = OrchestratorError::Cancelled(ErrorCode::CANCELLED);
        assert!(!open.is_retryable_by_default());
        assert!(!cancelled.is_retryable_by_default());
    }

    #[test]
    fn transient_io_is_retryable() {
        let err = OrchestratorError::transient_io("connection reset");
        assert!(err.is_retryable_by_default());
    }
}
