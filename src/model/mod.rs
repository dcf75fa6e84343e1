// Module: Data model
// Scenario/Step/Verification/Result types shared by the loader, router,
// and every driver. Serde derives and defaulting conventions follow the
// teacher's `protocol` module; the shape itself follows SPEC_FULL.md §3.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Scheduling priority. Ordered so that `Priority::CRITICAL < Priority::LOW`
/// under the derived `Ord`, letting the router sort scenarios directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    /// Case-insensitive parse with a lenient-mode fallback to `MEDIUM`,
    /// per SPEC_FULL.md §4.B ("unknown values fail in strict mode,
    /// otherwise default to MEDIUM").
    pub fn parse(raw: &str, strict: bool) -> Result<Self, String> {
        match raw.to_uppercase().as_str() {
            "CRITICAL" => Ok(Priority::Critical),
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            other if strict => Err(format!("unknown priority '{other}'")),
            _ => Ok(Priority::Medium),
        }
    }
}

/// The interface a scenario is driven against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Interface {
    Cli,
    Tui,
    Api,
    Websocket,
    Gui,
    Mixed,
}

impl Default for Interface {
    fn default() -> Self {
        Interface::Cli
    }
}

impl Interface {
    /// Case-insensitive parse with a lenient-mode fallback to `CLI`.
    pub fn parse(raw: &str, strict: bool) -> Result<Self, String> {
        match raw.to_uppercase().as_str() {
            "CLI" => Ok(Interface::Cli),
            "TUI" => Ok(Interface::Tui),
            "API" => Ok(Interface::Api),
            "WEBSOCKET" => Ok(Interface::Websocket),
            "GUI" => Ok(Interface::Gui),
            "MIXED" => Ok(Interface::Mixed),
            other if strict => Err(format!("unknown interface '{other}'")),
            _ => Ok(Interface::Cli),
        }
    }
}

/// A single declarative instruction within a scenario. Semantics are
/// driver-defined; the dispatcher matches `action` against a closed
/// per-driver action set (see `driver` module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "waitFor")]
    pub wait_for: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub expected: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub expected: Value,
    pub operator: String,
}

/// The unit of execution. See SPEC_FULL.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub interface: Interface,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub verifications: Vec<Verification>,
    #[serde(default, rename = "expectedOutcome")]
    pub expected_outcome: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub cleanup: Vec<Step>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default = "default_estimated_duration", rename = "estimatedDuration")]
    pub estimated_duration: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_estimated_duration() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Error,
    Running,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_result: Option<Value>,
}

impl StepResult {
    pub fn ok(step_index: usize, start_time: DateTime<Utc>, actual_result: Option<Value>) -> Self {
        let end_time = Utc::now();
        let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
        Self {
            step_index,
            status: StepStatus::Passed,
            duration_ms,
            start_time,
            end_time,
            error: None,
            actual_result,
        }
    }

    pub fn failed(step_index: usize, start_time: DateTime<Utc>, error: impl Into<String>) -> Self {
        let end_time = Utc::now();
        let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
        Self {
            step_index,
            status: StepStatus::Failed,
            duration_ms,
            start_time,
            end_time,
            error: Some(error.into()),
            actual_result: None,
        }
    }

    pub fn error(step_index: usize, start_time: DateTime<Utc>, error: impl Into<String>) -> Self {
        let mut r = Self::failed(step_index, start_time, error);
        r.status = StepStatus::Error;
        r
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScenarioStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepResult>,
}

impl ScenarioResult {
    pub fn skipped(scenario_id: &str) -> Self {
        let now = Utc::now();
        Self {
            scenario_id: scenario_id.to_string(),
            status: ScenarioStatus::Skipped,
            duration_ms: 0,
            start_time: now,
            end_time: now,
            error: None,
            steps: Vec::new(),
        }
    }
}

/// Run-level summary over every scenario result, following the teacher's
/// `ExecutionSummary::from_results` convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub success_rate: f64,
}

impl RunSummary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        let total = results.len();
        let passed = results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Passed)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Failed)
            .count();
        let errored = results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Error)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Skipped)
            .count();
        let success_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            total,
            passed,
            failed,
            errored,
            skipped,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scenarios: Vec<ScenarioResult>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, scenarios: Vec<ScenarioResult>) -> Self {
        let summary = RunSummary::from_results(&scenarios);
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            scenarios,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!(Priority::parse("critical", true).unwrap(), Priority::Critical);
        assert_eq!(Priority::parse("HIGH", true).unwrap(), Priority::High);
    }

    #[test]
    fn priority_lenient_defaults_to_medium() {
        assert_eq!(Priority::parse("bogus", false).unwrap(), Priority::Medium);
    }

    #[test]
    fn priority_strict_rejects_unknown() {
        assert!(Priority::parse("bogus", true).is_err());
    }

    #[test]
    fn priority_orders_critical_first() {
        let mut v = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        v.sort();
        assert_eq!(v, vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn summary_computes_success_rate() {
        let results = vec![
            ScenarioResult {
                scenario_id: "a".into(),
                status: ScenarioStatus::Passed,
                duration_ms: 1,
                start_time: Utc::now(),
                end_time: Utc::now(),
                error: None,
                steps: vec![],
            },
            ScenarioResult::skipped("b"),
        ];
        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.skipped, 1);
        assert!((summary.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
