// Scoped structured-logging context threaded through router/driver calls.
//
// Carries `{scenario_id, step_index, component, session_id}` as a tracing
// span, following the teacher's `#[instrument]` / `Span::current().record()`
// usage in `executors::wait` and `executors::http`. Per-scope copy, no
// cross-scenario leakage: each `LogScope` owns its own `tracing::Span`.

use tracing::Span;

/// A logging scope for one scenario/step/component combination.
///
/// Entering it (`enter()`) pushes a tracing span with the four fields
/// SPEC_FULL.md §5 requires; dropping the guard pops it.
#[derive(Debug, Clone)]
pub struct LogScope {
    span: Span,
}

impl LogScope {
    pub fn scenario(scenario_id: &str, component: &'static str) -> Self {
        let span = tracing::info_span!(
            "scenario",
            scenario_id = %scenario_id,
            step_index = tracing::field::Empty,
            component = %component,
            session_id = tracing::field::Empty,
        );
        Self { span }
    }

    pub fn step(scenario_id: &str, step_index: usize, component: &'static str) -> Self {
        let span = tracing::info_span!(
            "step",
            scenario_id = %scenario_id,
            step_index = step_index,
            component = %component,
            session_id = tracing::field::Empty,
        );
        Self { span }
    }

    pub fn with_session(self, session_id: &str) -> Self {
        self.span.record("session_id", session_id);
        self
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

const SENSITIVE_EVENT_NAMES: &[&str] = &["auth", "login", "authentication"];
const SENSITIVE_KEY_SUFFIXES: &[&str] = &["_TOKEN", "_KEY"];

/// True if `event_name` is a known sensitive event name (`auth`, `login`,
/// `authentication`) per SPEC_FULL.md §6 — callers should redact the
/// associated payload rather than log it verbatim.
pub fn is_sensitive_event(event_name: &str) -> bool {
    let lower = event_name.to_lowercase();
    SENSITIVE_EVENT_NAMES.iter().any(|n| lower.contains(n))
}

/// True if `key` looks like a secret-bearing field name (`*_TOKEN`,
/// `*_KEY`), case-insensitively.
pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    SENSITIVE_KEY_SUFFIXES.iter().any(|suf| upper.ends_with(suf))
}

/// Redacts `value` to a fixed placeholder if `key` looks sensitive,
/// otherwise returns it unchanged. Used before a value reaches a log sink.
pub fn redact_if_sensitive(key: &str, value: &str) -> String {
    if is_sensitive_key(key) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sensitive_event_names() {
        assert!(is_sensitive_event("user_login"));
        assert!(is_sensitive_event("AUTH_FAILURE"));
        assert!(!is_sensitive_event("scenario_completed"));
    }

    #[test]
    fn detects_sensitive_keys() {
        assert!(is_sensitive_key("API_TOKEN"));
        assert!(is_sensitive_key("session_key"));
        assert!(!is_sensitive_key("username"));
    }

    #[test]
    fn redacts_only_sensitive_keys() {
        assert_eq!(redact_if_sensitive("AUTH_TOKEN", "secret-value"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("username", "alice"), "alice");
    }
}
