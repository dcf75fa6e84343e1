// TUI driver: wires the PTY session manager and the TUI engine submodules
// (tokens, ansi, stabilize, menu, validate) into the Agent contract. Action
// dispatch follows the same one-match-arm-per-action shape as `driver::cli`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Scenario, ScenarioResult, ScenarioStatus, Step, StepResult};
use crate::pty::{PtySessionManager, SessionOptions};
use crate::tui::{self, tokens::platform_key_map};

use super::Agent;

/// Scenario-scoped state, local to one `execute()` call for the same
/// reason `driver::cli::CliState` is: one `TuiDriver` instance serves
/// every concurrently-running TUI scenario.
#[derive(Default)]
struct TuiState {
    session_id: Option<u32>,
    menu: tui::MenuContext,
    any_output_seen: bool,
}

pub struct TuiDriver {
    pty: PtySessionManager,
    key_map: HashMap<&'static str, &'static str>,
}

impl TuiDriver {
    pub fn new(pty: PtySessionManager) -> Self {
        let platform = if cfg!(windows) { "win32" } else { "unix" };
        Self { pty, key_map: platform_key_map(platform) }
    }

    async fn send_keys(&self, session_id: u32, text: &str) -> Result<(), OrchestratorError> {
        for token in tui::tokens::tokenize(text, &self.key_map) {
            self.pty.write(session_id, token.0.as_bytes())?;
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        Ok(())
    }

    async fn dispatch(&self, state: &mut TuiState, step: &Step, vars: &VarContext) -> Result<Value, OrchestratorError> {
        let target = vars.interpolate_str(&step.target);
        let timeout = step.timeout.map(Duration::from_millis).unwrap_or(Duration::from_secs(10));

        match step.action.to_lowercase().as_str() {
            "spawn" | "spawn_tui" => {
                let opts = SessionOptions { cols: 80, rows: 24, cwd: None, env: HashMap::new() };
                let parts: Vec<String> = target.split_whitespace().map(str::to_string).collect();
                let (cmd, args) = parts.split_first().map(|(c, a)| (Some(c.as_str()), a.to_vec())).unwrap_or((None, vec![]));
                let id = self.pty.create_session(cmd, &args, opts)?;
                state.session_id = Some(id);
                state.menu.reset();
                Ok(json!(id))
            }
            "send_input" | "input" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let text = step.value.as_ref().and_then(|v| v.as_str()).map(|s| vars.interpolate_str(s)).unwrap_or(target);
                self.send_keys(session_id, &text).await?;
                Ok(Value::Null)
            }
            "navigate_menu" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let item = step
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .map(|s| vars.interpolate_str(s))
                    .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "navigate_menu requires a value naming the menu item"))?;
                let buffer = self.pty.buffer(session_id)?;
                tui::stabilize(&buffer, timeout).await?;
                state.menu.items = tui::menu::parse_items(&buffer.latest_text());
                let target_index = state.menu.locate(&item)?;
                let steps = state.menu.steps_to(target_index);
                let key = if steps < 0 { "{ArrowUp}" } else { "{ArrowDown}" };
                for _ in 0..steps.unsigned_abs() {
                    self.send_keys(session_id, key).await?;
                }
                self.send_keys(session_id, "{Enter}").await?;
                state.menu.advance_to(target_index, &item);
                Ok(json!({ "selectedIndex": target_index, "history": state.menu.history }))
            }
            "validate_output" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let buffer = self.pty.buffer(session_id)?;
                let text = buffer.latest_text();
                state.any_output_seen = state.any_output_seen || !text.is_empty();
                let expected = step
                    .expected
                    .as_ref()
                    .or(step.value.as_ref())
                    .ok_or_else(|| OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "validate_output requires an expected value"))?;
                if tui::validate_output(&tui::strip_ansi(&text), expected, state.any_output_seen)? {
                    Ok(json!(text))
                } else {
                    Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, format!("output did not match: {text}")))
                }
            }
            "validate_colors" | "validate_formatting" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let buffer = self.pty.buffer(session_id)?;
                let mut parser = tui::AnsiParser::new();
                let spans = parser.feed(&buffer.latest_text());
                let expected_style = step
                    .expected
                    .as_ref()
                    .and_then(|v| v.get("fg"))
                    .and_then(|v| v.as_str());
                let matched = match expected_style {
                    Some(fg) => spans.iter().any(|s| s.style.fg.as_deref() == Some(fg)),
                    None => !spans.is_empty(),
                };
                if matched {
                    Ok(json!(spans.len()))
                } else {
                    Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_VALIDATION, "no span matched the expected style"))
                }
            }
            "capture_output" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let buffer = self.pty.buffer(session_id)?;
                Ok(json!(buffer.latest_text()))
            }
            "wait_for_output" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let buffer = self.pty.buffer(session_id)?;
                let pattern = if target.is_empty() {
                    step.value.as_ref().and_then(|v| v.as_str()).unwrap_or_default().to_string()
                } else {
                    target.clone()
                };
                Ok(json!(tui::stabilize::wait_for_pattern(&buffer, &pattern, timeout).await?))
            }
            "resize_terminal" => {
                let session_id = state.session_id.ok_or_else(session_missing)?;
                let dims: Vec<u16> = target.split('x').filter_map(|s| s.parse().ok()).collect();
                let (cols, rows) = match dims.as_slice() {
                    [c, r] => (*c, *r),
                    _ => (80, 24),
                };
                self.pty.resize(session_id, cols, rows)?;
                Ok(json!({ "cols": cols, "rows": rows }))
            }
            "kill_session" => {
                let session_id = state.session_id.take().ok_or_else(session_missing)?;
                self.pty.destroy_session(session_id).await?;
                Ok(Value::Null)
            }
            "wait" => {
                let ms = step.timeout.or_else(|| step.value.as_ref().and_then(|v| v.as_u64())).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::Null)
            }
            other => Err(OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("Unsupported TUI action: {other}"))),
        }
    }
}

fn session_missing() -> OrchestratorError {
    OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, "no active PTY session; call 'spawn' first")
}

#[async_trait]
impl Agent for TuiDriver {
    fn name(&self) -> &str {
        "tui"
    }

    fn interface(&self) -> Interface {
        Interface::Tui
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
        let mut state = TuiState::default();

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

        if let Some(session_id) = state.session_id {
            if let Err(e) = self.pty.destroy_session(session_id).await {
                tracing::warn!(scenario = %scenario.id, error = %e, "failed to destroy PTY session after scenario completion");
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
        // Best-effort safety net: every session this driver creates is
        // already destroyed at the end of its own `execute` call.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use crate::process::ProcessLifecycleManager;

    fn scenario(steps: Vec<Step>) -> Scenario {
        Scenario {
            id: "t1".into(),
            name: "test".into(),
            description: "".into(),
            priority: Priority::Medium,
            interface: Interface::Tui,
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
    async fn spawn_then_capture_output() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let pty = PtySessionManager::new(plm);
        let driver = TuiDriver::new(pty);
        let s = scenario(vec![
            step("spawn", "sh -c \"echo hi\"", None),
            step("wait", "", Some(json!(300))),
            step("capture_output", "", None),
        ]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Passed);
    }

    #[tokio::test]
    async fn navigate_menu_selects_item_named_in_value() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let pty = PtySessionManager::new(plm);
        let driver = TuiDriver::new(pty);
        let s = scenario(vec![
            step("spawn", "sh -c \"printf '1. Alpha\\n2. Beta\\n3. Gamma\\n'; sleep 2\"", None),
            step("navigate_menu", "<session>", Some(json!("Beta"))),
        ]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Passed);
        let actual = result.steps[1].actual_result.as_ref().unwrap();
        assert_eq!(actual["selectedIndex"], json!(1));
        assert_eq!(actual["history"], json!(["Beta"]));
    }

    #[tokio::test]
    async fn action_before_spawn_fails() {
        let (plm, _rx) = ProcessLifecycleManager::new();
        let pty = PtySessionManager::new(plm);
        let driver = TuiDriver::new(pty);
        let s = scenario(vec![step("send_input", "hello", None)]);
        let result = driver.execute(&s, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ScenarioStatus::Error);
    }
}
