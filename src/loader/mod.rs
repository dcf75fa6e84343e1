// Module: Loader
// Turns a scenario file or directory on disk into validated `model::Scenario`
// values, resolving `include` directives and `${...}` variables along the
// way. Orchestration shape follows the teacher's directory-walk-then-parse
// convention; include resolution and variable interpolation have no
// teacher counterpart (see `loader::include`, `context::vars`).

pub mod include;
pub mod validate;

use std::path::{Path, PathBuf};

use serde_yaml::Value as YamlValue;

use crate::config::RunnerLimits;
use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::Scenario;

use include::IncludeResolver;

/// A single file that failed to load. Collected rather than propagated so
/// that one bad scenario file does not abort loading the rest of a
/// directory.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<Scenario>,
    pub load_failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.load_failures.is_empty()
    }
}

/// Loads every scenario reachable from `path`. If `path` is a file, loads
/// just that file; if it is a directory, walks `*.yaml`/`*.yml` entries
/// sorted by filename for deterministic ordering.
pub fn load_scenarios(path: &Path, limits: &RunnerLimits, strict: bool) -> Result<LoadReport, OrchestratorError> {
    let files = if path.is_dir() {
        collect_scenario_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    if files.len() > limits.max_scenarios {
        return Err(OrchestratorError::config(
            ErrorCode::INVALID_SCENARIO,
            format!("{} scenario files exceed maxScenarios={}", files.len(), limits.max_scenarios),
        ));
    }

    let mut report = LoadReport::default();
    for file in files {
        match load_one(&file, limits, strict) {
            Ok(scenario) => report.loaded.push(scenario),
            Err(err) => report.load_failures.push(LoadFailure {
                path: file,
                message: err.to_string(),
            }),
        }
    }
    Ok(report)
}

fn collect_scenario_files(dir: &Path) -> Result<Vec<PathBuf>, OrchestratorError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("cannot read directory {}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
        .collect();
    files.sort();
    Ok(files)
}

fn load_one(path: &Path, limits: &RunnerLimits, strict: bool) -> Result<Scenario, OrchestratorError> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let raw = std::fs::read_to_string(path)
        .map_err(|e| OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("cannot read {}: {e}", path.display())))?;
    let parsed: YamlValue = serde_yaml::from_str(&raw)
        .map_err(|e| OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("invalid YAML in {}: {e}", path.display())))?;

    let mut resolver = IncludeResolver::new(base_dir, limits.max_include_depth);
    let resolved = resolver.resolve(parsed, path)?;

    let variables = resolved
        .as_mapping()
        .and_then(|m| m.get(YamlValue::String("variables".to_string())))
        .cloned()
        .unwrap_or(YamlValue::Mapping(Default::default()));
    let variables_json: serde_json::Value = serde_yaml::from_value(variables)
        .map_err(|e| OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("invalid 'variables' in {}: {e}", path.display())))?;

    let mut ctx = VarContext::new();
    ctx.scenario = variables_json;

    let json_value: serde_json::Value = serde_json::to_value(
        resolved
            .as_mapping()
            .cloned()
            .map(YamlValue::Mapping)
            .unwrap_or(resolved.clone()),
    )
    .map_err(|e| OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("cannot convert {}: {e}", path.display())))?;
    let interpolated = ctx.interpolate_value(&json_value);

    let mut scenario: Scenario = serde_json::from_value(interpolated)
        .map_err(|e| OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("invalid scenario shape in {}: {e}", path.display())))?;

    validate::validate_scenario(&mut scenario, strict).map_err(|errs| {
        let joined = errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        OrchestratorError::config(ErrorCode::INVALID_SCENARIO, format!("{}: {joined}", path.display()))
    })?;

    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &Path, name: &str, content: &str) -> PathBuf {
        let p = dir.join(name);
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        p
    }

    const VALID: &str = r#"
id: s1
name: "Login flow"
description: "exercises login"
steps:
  - action: execute
    target: "echo hi"
"#;

    #[test]
    fn loads_single_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(dir.path(), "s1.yaml", VALID);
        let report = load_scenarios(&path, &RunnerLimits::default(), true).unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert!(report.is_clean());
    }

    #[test]
    fn one_bad_file_does_not_abort_directory_load() {
        let dir = tempfile::tempdir().unwrap();
        write_tmp(dir.path(), "good.yaml", VALID);
        write_tmp(dir.path(), "bad.yaml", "id: \"\"\nname: \"\"\ndescription: \"\"\nsteps: []\n");
        let report = load_scenarios(dir.path(), &RunnerLimits::default(), true).unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.load_failures.len(), 1);
    }

    #[test]
    fn interpolates_scenario_variables_during_load() {
        let dir = tempfile::tempdir().unwrap();
        let content = r#"
id: s1
name: "Login flow"
description: "uses ${base_url}"
variables:
  base_url: "https://example.com"
steps:
  - action: execute
    target: "curl ${base_url}"
"#;
        let path = write_tmp(dir.path(), "s1.yaml", content);
        let report = load_scenarios(&path, &RunnerLimits::default(), true).unwrap();
        assert_eq!(report.loaded[0].steps[0].target, "curl https://example.com");
    }
}
