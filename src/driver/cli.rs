// CLI driver: spawns shell commands through the process lifecycle manager
// and validates exit codes/output/filesystem state. Step dispatch follows
// the teacher's `StepExecutor::execute` shape (one match arm per action,
// `StepResult` built at the end) generalized to the CLI action vocabulary
// in SPEC_FULL.md §6, plus the optional interactive-prompt auto-response
// behavior from §9 (`set_auto_response` registers a prompt-substring ->
// reply mapping; `execute` consults it while waiting for the process).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::RegexBuilder;
use serde_json::{json, Value};

use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Scenario, ScenarioResult, ScenarioStatus, Step, StepResult};
use crate::process::{ProcessLifecycleManager, SpawnOptions};
use crate::tui::validate::validate_output;

use super::Agent;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Scenario-scoped state threaded through one `execute()` call. Never
/// stored on `CliDriver` itself since the same driver instance serves
/// every concurrently-running CLI scenario.
#[derive(Default)]
struct CliState {
    cwd: Option<String>,
    env: HashMap<String, String>,
    last_pid: Option<u32>,
    last_exit_code: Option<i32>,
    last_output: String,
    /// Prompt-substring -> response, in insertion order so that when a
    /// printed line matches more than one key the earliest-registered one
    /// wins (SPEC_FULL.md §9, "Interactive prompt auto-responses").
    auto_responses: Vec<(String, String)>,
}

pub struct CliDriver {
    plm: ProcessLifecycleManager,
}

impl CliDriver {
    pub fn new(plm: ProcessLifecycleManager) -> Self {
        Self { plm }
    }

    async fn spawn_shell(&self, state: &mut CliState, command: &str) -> Result<u32, OrchestratorError> {
        let opts = SpawnOptions { cwd: state.cwd.clone(), env: state.env.clone() };
        let handle = self.plm.start("sh", &["-c".to_string(), command.to_string()], opts).await?;
        state.last_pid = Some(handle.pid);
        Ok(handle.pid)
    }

    async fn poll_for_pattern(&self, pid: u32, pattern: &str, timeout: Duration) -> Result<String, OrchestratorError> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("invalid pattern '{pattern}': {e}")))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let text = self.plm.output(pid).await?;
            if let Some(m) = re.find(&text) {
                return Ok(m.as_str().to_string());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OrchestratorError::timeout(ErrorCode::PATTERN_TIMEOUT, format!("pattern '{pattern}' not observed in time")));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits for `pid` to exit, writing an auto-response to stdin whenever
    /// the most recently printed line matches a registered prompt
    /// substring. Matching is re-evaluated only against output printed
    /// since the last check, so a line is never answered twice.
    async fn wait_with_auto_responses(
        &self,
        state: &CliState,
        pid: u32,
        timeout: Option<Duration>,
    ) -> Result<crate::process::ProcessStatus, OrchestratorError> {
        if state.auto_responses.is_empty() {
            return self.plm.wait_for(pid, timeout).await;
        }

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut seen_len = 0usize;
        loop {
            if let Some(status) = self.plm.try_wait(pid).await? {
                return Ok(status);
            }
            let output = self.plm.output(pid).await?;
            if output.len() > seen_len {
                let fresh = &output[seen_len..];
                seen_len = output.len();
                if let Some(last_line) = fresh.lines().last() {
                    if let Some((_, response)) = state.auto_responses.iter().find(|(key, _)| last_line.contains(key.as_str())) {
                        let mut payload = response.clone();
                        payload.push('\n');
                        self.plm.write_stdin(pid, payload.as_bytes()).await?;
                    }
                }
            }
            if let Some(d) = deadline {
                if tokio::time::Instant::now() >= d {
                    return Err(OrchestratorError::timeout(ErrorCode::PATTERN_TIMEOUT, "process did not exit in time"));
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn dispatch(&self, state: &mut CliState, step: &Step, vars: &VarContext) -> Result<Value, OrchestratorError> {
        let target = vars.interpolate_str(&step.target);
        let timeout = step.timeout.map(Duration::from_millis);

        match step.action.to_lowercase().as_str() {
            "execute" => {
                let pid = self.spawn_shell(state, &target).await?;
                let status = self.wait_with_auto_responses(state, pid, timeout).await?;
                state.last_exit_code = match status {
                    crate::process::ProcessStatus::Exited(code) => Some(code),
                    _ => None,
                };
                let output = self.plm.output(pid).await?;
                state.last_output = output.clone();
                Ok(json!(output))
            }
            "execute_with_input" => {
                let input = step
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .map(|s| vars.interpolate_str(s))
                    .unwrap_or_default();
                let pid = self.spawn_shell(state, &target).await?;
                self.plm.write_stdin(pid, input.as_bytes()).await?;
                self.plm.close_stdin(pid).await?;
                self.plm.wait_for(pid, timeout).await?;
                let output = self.plm.output(pid).await?;
                state.last_output = output.clone();
                Ok(json!(output))
            }
            "validate_exit_code" => {
                let expected = step
                    .expected
                    .as_ref()
                    .or(step.value.as_ref())
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "validate_exit_code requires a numeric expected value"))?;
                let actual = state.last_exit_code.ok_or_else(|| {
                    OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, "validate_exit_code called before any 'execute' step")
                })?;
                if actual as i64 == expected {
                    Ok(json!(actual))
                } else {
                    Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("exit code {actual} != expected {expected}")))
                }
            }
            "validate_output" => {
                let expected = step
                    .expected
                    .as_ref()
                    .or(step.value.as_ref())
                    .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "validate_output requires an expected value"))?;
                if validate_output(&state.last_output, expected, false)? {
                    Ok(json!(state.last_output))
                } else {
                    Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("output did not match: {}", state.last_output)))
                }
            }
            "wait_for_output" => {
                let pid = state
                    .last_pid
                    .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, "wait_for_output called before any process was started"))?;
                let pattern = if target.is_empty() {
                    step.value.as_ref().and_then(|v| v.as_str()).unwrap_or_default().to_string()
                } else {
                    target.clone()
                };
                let found = self.poll_for_pattern(pid, &pattern, timeout.unwrap_or(Duration::from_secs(10))).await?;
                Ok(json!(found))
            }
            "kill" => {
                let pid = target.parse::<u32>().ok().or(state.last_pid).ok_or_else(|| {
                    OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, "kill requires a pid target or a prior 'execute'")
                })?;
                let signal = step.value.as_ref().and_then(|v| v.as_str()).unwrap_or("TERM");
                Ok(json!(self.plm.kill(pid, signal)))
            }
            "set_auto_response" => {
                let response = step
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .map(|s| vars.interpolate_str(s))
                    .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "set_auto_response requires a string value"))?;
                if !state.auto_responses.iter().any(|(key, _)| key == &target) {
                    state.auto_responses.push((target.clone(), response));
                }
                Ok(json!({ target: true }))
            }
            "set_env" => {
                let value = step.value.as_ref().and_then(|v| v.as_str()).map(|s| vars.interpolate_str(s)).unwrap_or_default();
                state.env.insert(target.clone(), value.clone());
                Ok(json!({ target: value }))
            }
            "change_dir" => {
                state.cwd = Some(target.clone());
                Ok(json!(target))
            }
            "file_exists" => {
                let exists = std::path::Path::new(&target).is_file();
                if step.expected.as_ref().and_then(|v| v.as_bool()).unwrap_or(true) != exists {
                    return Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("file_exists('{target}') = {exists}")));
                }
                Ok(json!(exists))
            }
            "dir_exists" => {
                let exists = std::path::Path::new(&target).is_dir();
                if step.expected.as_ref().and_then(|v| v.as_bool()).unwrap_or(true) != exists {
                    return Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("dir_exists('{target}') = {exists}")));
                }
                Ok(json!(exists))
            }
            "get_output" => Ok(json!(state.last_output)),
            "wait" => {
                let ms = step
                    .timeout
                    .or_else(|| step.value.as_ref().and_then(|v| v.as_u64()))
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::Null)
            }
            other => Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("Unsupported CLI action: {other}"))),
        }
    }
}

#[async_trait]
impl Agent for CliDriver {
    fn name(&self) -> &str {
        "cli"
    }

    fn interface(&self) -> Interface {
        Interface::Cli
    }

    async fn initialize(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        vars: &VarContext,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<ScenarioResult, OrchestratorError> {
        let started = Utc::now();
        let mut scenario_vars = vars.clone();
        scenario_vars.scenario = json!(scenario.variables);
        let mut state = CliState { env: scenario.environment.clone(), ..Default::default() };

        let mut steps = Vec::with_capacity(scenario.steps.len());
        let mut overall = ScenarioStatus::Passed;

        for (index, step) in scenario.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                overall = if steps.is_empty() { ScenarioStatus::Skipped } else { ScenarioStatus::Error };
                break;
            }
            let step_started = Utc::now();
            match self.dispatch(&mut state, step, &scenario_vars).await {
                Ok(actual) => steps.push(StepResult::ok(index, step_started, Some(actual))),
                Err(err) => {
                    if super::is_error_not_failure(&err) {
                        steps.push(StepResult::error(index, step_started, err.to_string()));
                        overall = ScenarioStatus::Error;
                    } else {
                        steps.push(StepResult::failed(index, step_started, err.to_string()));
                        overall = ScenarioStatus::Failed;
                    }
                    break;
                }
            }
        }

        let finished = Utc::now();
        Ok(ScenarioResult {
            scenario_id: scenario.id.clone(),
            status: overall,
            duration_ms: (finished - started).num_milliseconds().max(0) as u64,
            start_time: started,
            end_time: finished,
            error: steps.iter().rev().find_map(|s| s.error.clone()),
            steps,
        })
    }

    async fn cleanup(&self) -> Result<(), OrchestratorError> {
        // No driver-owned resources survive `execute`: every spawned
        // process is already tracked, and reaped, by the shared PLM.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, Step};

    fn scenario(steps: Vec<Step>) -> Scenario {
        Scenario {
            id: "s1".into(),
            name: "test".into(),
            description: "".into(),
            priority: Priority::Medium,
            interface: Interface::Cli,
            prerequisites: vec![],
            steps,
            verifications: vec![],
            expected_outcome: None,
            tags: vec![],
            enabled: true,
            environment: HashMap::new(),
            cleanup: vec![],
            variables: HashMap::new(),
            estimated_duration: 60,
        }
    }

    fn step(action: &str, target: &str, value: Option<Value>) -> Step {
        Step { action: action.into(), target: target.into(), value, wait_for: None, timeout: None, expected: None }
    }

    #[tokio::test]
    async fn execute_echo_passes_and_captures_output() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let driver = CliDriver::new(plm);
        let s = scenario(vec![step("execute", "echo hi", None)]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Passed);
        assert!(result.steps[0].actual_result.as_ref().unwrap().as_str().unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn validate_exit_code_fails_on_mismatch() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let driver = CliDriver::new(plm);
        let s = scenario(vec![
            step("execute", "exit 3", None),
            step("validate_exit_code", "", Some(json!(0))),
        ]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn auto_response_answers_an_interactive_prompt() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let driver = CliDriver::new(plm);
        let s = scenario(vec![
            step("set_auto_response", "Proceed?", Some(json!("yes"))),
            step("execute", "read -p 'Proceed? ' ans; echo \"got:$ans\"", None),
        ]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Passed);
        let output = result.steps[1].actual_result.as_ref().unwrap().as_str().unwrap().to_string();
        assert!(output.contains("got:yes"), "unexpected output: {output}");
    }

    #[tokio::test]
    async fn unsupported_action_errors_with_its_name() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let driver = CliDriver::new(plm);
        let s = scenario(vec![step("frobnicate", "", None)]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Error);
        assert!(result.error.as_ref().unwrap().contains("Unsupported CLI action"));
    }
}
