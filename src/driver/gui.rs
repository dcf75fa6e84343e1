// GUI driver contract. SPEC_FULL.md never documents a GUI action
// vocabulary (only CLI, TUI, and WebSocket get one in §6) — desktop GUI
// automation is entirely out of scope beyond satisfying the Agent trait,
// so every action is reported as unsupported.

use async_trait::async_trait;
use chrono::Utc;

use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Scenario, ScenarioResult, ScenarioStatus, StepResult};

use super::Agent;

pub struct GuiDriver;

impl Default for GuiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl GuiDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for GuiDriver {
    fn name(&self) -> &str {
        "gui"
    }

    fn interface(&self) -> Interface {
        Interface::Gui
    }

    async fn initialize(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn execute(
        &self,
        scenario: &Scenario,
        _vars: &VarContext,
        _cancel: tokio_util::sync::CancellationToken,
    ) -> Result<ScenarioResult, OrchestratorError> {
        let started = Utc::now();
        let mut steps = Vec::with_capacity(scenario.steps.len());

        if let Some(step) = scenario.steps.first() {
            steps.push(StepResult::error(
                0,
                started,
                OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("Unsupported GUI action: {}", step.action)).to_string(),
            ));
        }

        let finished = Utc::now();
        Ok(ScenarioResult {
            scenario_id: scenario.id.clone(),
            status: ScenarioStatus::Error,
            duration_ms: (finished - started).num_milliseconds().max(0) as u64,
            start_time: started,
            end_time: finished,
            error: steps.first().and_then(|s| s.error.clone()),
            steps,
        })
    }

    async fn cleanup(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}
