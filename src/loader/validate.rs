// Required-field and enum validation for a deserialized scenario, run
// before it is accepted into a `LoadReport`. Mirrors the teacher's
// `validation::validate_plan` shape: accumulate every error found rather
// than bailing on the first one.

use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Priority, Scenario};

/// Validates required fields and normalizes enum fields in place.
///
/// `strict` controls whether an unrecognized `priority`/`interface` value
/// is a hard failure (strict) or silently coerced to its default (lenient),
/// per SPEC_FULL.md §4.B.
pub fn validate_scenario(scenario: &mut Scenario, strict: bool) -> Result<(), Vec<OrchestratorError>> {
    let mut errors = Vec::new();

    if scenario.id.trim().is_empty() {
        errors.push(missing_field("id"));
    }
    if scenario.name.trim().is_empty() {
        errors.push(missing_field("name"));
    }
    if scenario.description.trim().is_empty() {
        errors.push(missing_field("description"));
    }
    if scenario.steps.is_empty() {
        errors.push(OrchestratorError::config(
            ErrorCode::MISSING_REQUIRED_FIELD,
            "scenario has no steps",
        ));
    }

    for (i, step) in scenario.steps.iter().enumerate() {
        if step.action.trim().is_empty() {
            errors.push(missing_field(&format!("steps[{i}].action")));
        }
        if step.target.trim().is_empty() && !matches!(step.action.as_str(), "wait" | "sleep") {
            errors.push(missing_field(&format!("steps[{i}].target")));
        }
    }

    for (i, v) in scenario.verifications.iter().enumerate() {
        if v.kind.trim().is_empty() {
            errors.push(missing_field(&format!("verifications[{i}].type")));
        }
        if v.target.trim().is_empty() {
            errors.push(missing_field(&format!("verifications[{i}].target")));
        }
        if v.operator.trim().is_empty() {
            errors.push(missing_field(&format!("verifications[{i}].operator")));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(())
}

/// Re-parses `priority`/`interface` raw strings under `strict`, producing
/// validation errors for anything the serde enum deserialize already
/// accepted loosely. Used when the caller wants strict enum enforcement
/// without giving up serde's default derive for the common case.
pub fn validate_enums(raw_priority: &str, raw_interface: &str, strict: bool) -> Result<(Priority, Interface), Vec<OrchestratorError>> {
    let mut errors = Vec::new();
    let priority = match Priority::parse(raw_priority, strict) {
        Ok(p) => Some(p),
        Err(msg) => {
            errors.push(OrchestratorError::config(ErrorCode::UNSUPPORTED_ENUM_VALUE, msg));
            None
        }
    };
    let interface = match Interface::parse(raw_interface, strict) {
        Ok(i) => Some(i),
        Err(msg) => {
            errors.push(OrchestratorError::config(ErrorCode::UNSUPPORTED_ENUM_VALUE, msg));
            None
        }
    };

    match (priority, interface) {
        (Some(p), Some(i)) => Ok((p, i)),
        _ => Err(errors),
    }
}

fn missing_field(path: &str) -> OrchestratorError {
    OrchestratorError::config(ErrorCode::MISSING_REQUIRED_FIELD, format!("missing required field '{path}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Step;

    fn valid_scenario() -> Scenario {
        Scenario {
            id: "s1".into(),
            name: "name".into(),
            description: "desc".into(),
            priority: Priority::Medium,
            interface: Interface::Cli,
            prerequisites: vec![],
            steps: vec![Step {
                action: "execute".into(),
                target: "echo hi".into(),
                value: None,
                wait_for: None,
                timeout: None,
                expected: None,
            }],
            verifications: vec![],
            expected_outcome: None,
            tags: vec![],
            enabled: true,
            environment: Default::default(),
            cleanup: vec![],
            variables: Default::default(),
            estimated_duration: 60,
        }
    }

    #[test]
    fn accepts_valid_scenario() {
        let mut s = valid_scenario();
        assert!(validate_scenario(&mut s, true).is_ok());
    }

    #[test]
    fn rejects_empty_steps() {
        let mut s = valid_scenario();
        s.steps.clear();
        let errs = validate_scenario(&mut s, true).unwrap_err();
        assert!(!errs.is_empty());
    }

    #[test]
    fn rejects_blank_id() {
        let mut s = valid_scenario();
        s.id = "  ".into();
        let errs = validate_scenario(&mut s, true).unwrap_err();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn wait_step_does_not_require_target() {
        let mut s = valid_scenario();
        s.steps[0].action = "wait".into();
        s.steps[0].target = String::new();
        assert!(validate_scenario(&mut s, true).is_ok());
    }

    #[test]
    fn strict_rejects_unknown_enum_values() {
        assert!(validate_enums("bogus", "CLI", true).is_err());
        assert!(validate_enums("bogus", "CLI", false).is_ok());
    }
}
