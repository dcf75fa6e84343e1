// Output validation spellings accepted by the TUI (and reused by the CLI)
// driver's `validate_output` step. Built from SPEC_FULL.md §4.E.5; no
// teacher counterpart, though the "accumulate first error" discipline
// follows the teacher's `validation` module.

use regex::RegexBuilder;
use serde_json::Value;

use crate::errors::{ErrorCode, OrchestratorError};

/// `expected` is either a bare string (with `regex:`/`contains:` prefixes)
/// or an object `{type, value}`. `output` is the current captured text;
/// `any_prior_output_nonempty` backs the `not_empty` fallback described
/// in SPEC_FULL.md §4.E.5.
pub fn validate_output(output: &str, expected: &Value, any_prior_output_nonempty: bool) -> Result<bool, OrchestratorError> {
    match expected {
        Value::String(s) => validate_string_spelling(output, s),
        Value::Object(map) => {
            let kind = map
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "validation object missing 'type'"))?;
            let value = map.get("value");
            validate_typed(output, kind, value, any_prior_output_nonempty)
        }
        other => Err(OrchestratorError::usage(
            ErrorCode::UNSUPPORTED_VALIDATION,
            format!("unsupported expected-value shape: {other}"),
        )),
    }
}

static REGEX_PREFIX: &str = "regex:";
static CONTAINS_PREFIX: &str = "contains:";

fn validate_string_spelling(output: &str, expected: &str) -> Result<bool, OrchestratorError> {
    if let Some(pattern) = expected.strip_prefix(REGEX_PREFIX) {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("invalid regex '{pattern}': {e}")))?;
        Ok(re.is_match(output))
    } else if let Some(needle) = expected.strip_prefix(CONTAINS_PREFIX) {
        Ok(output.contains(needle))
    } else {
        Ok(output.trim() == expected.trim())
    }
}

fn validate_typed(output: &str, kind: &str, value: Option<&Value>, any_prior_output_nonempty: bool) -> Result<bool, OrchestratorError> {
    let as_str = |label: &str| -> Result<String, OrchestratorError> {
        value
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("'{label}' validation requires a string value")))
    };

    match kind {
        "contains" => Ok(output.contains(&as_str("contains")?)),
        "not_contains" => Ok(!output.contains(&as_str("not_contains")?)),
        "starts_with" => Ok(output.starts_with(&as_str("starts_with")?)),
        "ends_with" => Ok(output.ends_with(&as_str("ends_with")?)),
        "empty" => Ok(output.is_empty()),
        "not_empty" => {
            if !output.is_empty() {
                Ok(true)
            } else {
                Ok(any_prior_output_nonempty)
            }
        }
        "length" => {
            let limit = value
                .and_then(|v| v.as_u64())
                .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "'length' validation requires a numeric value"))?;
            Ok(output.chars().count() as u64 <= limit)
        }
        other => Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("unsupported validation type '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_trimmed_equality() {
        assert!(validate_output("  ok  ", &json!("ok"), false).unwrap());
    }

    #[test]
    fn regex_prefix_is_case_insensitive() {
        assert!(validate_output("LOGIN OK", &json!("regex:login ok"), false).unwrap());
    }

    #[test]
    fn contains_prefix_substring_match() {
        assert!(validate_output("hello world", &json!("contains:world"), false).unwrap());
    }

    #[test]
    fn length_operator_is_less_than_or_equal() {
        assert!(validate_output("hi", &json!({"type": "length", "value": 2}), false).unwrap());
        assert!(!validate_output("hello", &json!({"type": "length", "value": 2}), false).unwrap());
    }

    #[test]
    fn not_empty_falls_back_to_prior_output() {
        assert!(validate_output("", &json!({"type": "not_empty"}), true).unwrap());
        assert!(!validate_output("", &json!({"type": "not_empty"}), false).unwrap());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(validate_output("x", &json!({"type": "bogus"}), false).is_err());
    }
}
