// Variable resolution for `${a.b.c}` interpolation.
//
// Precedence highest-to-lowest, per SPEC_FULL.md §6: inline `variables` on
// an include, scenario-level `variables`, global context, environment.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static INTERPOLATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.:-]+)\}").unwrap());

/// Layered variable context consulted during `${...}` resolution.
#[derive(Debug, Clone, Default)]
pub struct VarContext {
    /// Highest precedence: variables declared on an include directive.
    pub include: Value,
    /// Scenario-level `variables` map.
    pub scenario: Value,
    /// Run-wide global context (shared across scenarios).
    pub global: Value,
}

impl VarContext {
    pub fn new() -> Self {
        Self {
            include: Value::Object(Default::default()),
            scenario: Value::Object(Default::default()),
            global: Value::Object(Default::default()),
        }
    }

    /// Resolves a dot-path like `user.id` against `{include, scenario,
    /// global, env}` in that order, returning `None` if found nowhere.
    fn resolve_token(&self, token: &str) -> Option<String> {
        if let Some(name) = token.strip_prefix("env.") {
            return std::env::var(name).ok();
        }

        for layer in [&self.include, &self.scenario, &self.global] {
            if let Some(v) = resolve_dot_path(layer, token) {
                return Some(value_to_interpolated_string(v));
            }
        }
        std::env::var(token).ok()
    }

    /// Replaces every `${...}` occurrence in `input`. Tokens that fail to
    /// resolve are left verbatim, including the surrounding `${}` — the
    /// key divergence from the teacher's `Context::interpolate_str`, which
    /// errored instead.
    pub fn interpolate_str(&self, input: &str) -> String {
        INTERPOLATION_RE
            .replace_all(input, |caps: &regex::Captures| {
                let token = &caps[1];
                self.resolve_token(token)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Recursively interpolates every string leaf of a JSON value.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate_str(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn resolve_dot_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn value_to_interpolated_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_scenario_variable() {
        let mut ctx = VarContext::new();
        ctx.scenario = json!({"user": {"id": 42}});
        assert_eq!(ctx.interpolate_str("id=${user.id}"), "id=42");
    }

    #[test]
    fn preserves_literal_on_failed_resolution() {
        let ctx = VarContext::new();
        assert_eq!(ctx.interpolate_str("x=${nonexistent.path}"), "x=${nonexistent.path}");
    }

    #[test]
    fn include_variables_take_precedence_over_scenario() {
        let mut ctx = VarContext::new();
        ctx.scenario = json!({"name": "scenario-level"});
        ctx.include = json!({"name": "include-level"});
        assert_eq!(ctx.interpolate_str("${name}"), "include-level");
    }

    #[test]
    fn env_prefix_reads_environment() {
        std::env::set_var("ORCHESTRATOR_TEST_VAR", "from-env");
        let ctx = VarContext::new();
        assert_eq!(ctx.interpolate_str("${env.ORCHESTRATOR_TEST_VAR}"), "from-env");
        std::env::remove_var("ORCHESTRATOR_TEST_VAR");
    }

    #[test]
    fn interpolates_nested_json_value() {
        let mut ctx = VarContext::new();
        ctx.scenario = json!({"host": "example.com"});
        let input = json!({"url": "https://${host}/api", "list": ["${host}"]});
        let out = ctx.interpolate_value(&input);
        assert_eq!(out["url"], "https://example.com/api");
        assert_eq!(out["list"][0], "example.com");
    }
}
