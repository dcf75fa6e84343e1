// WebSocket driver contract. The documented action vocabulary from
// SPEC_FULL.md §6 is recognized here; the wire implementation over
// `tokio-tungstenite` is an explicit Non-goal, so every action reports
// itself as not implemented rather than silently no-opping.

use async_trait::async_trait;
use chrono::Utc;

use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Scenario, ScenarioResult, ScenarioStatus, StepResult};

use super::Agent;

const ACTIONS: &[&str] = &[
    "connect", "disconnect", "send", "emit", "wait_for_message", "wait_for_event",
    "validate_message", "validate_connection", "add_listener", "remove_listener",
    "ping", "set_auth", "wait",
];

pub struct WebSocketDriver;

impl Default for WebSocketDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for WebSocketDriver {
    fn name(&self) -> &str {
        "websocket"
    }

    fn interface(&self) -> Interface {
        Interface::Websocket
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

        for (index, step) in scenario.steps.iter().enumerate() {
            let step_started = Utc::now();
            let action = step.action.to_lowercase();
            let err = if ACTIONS.contains(&action.as_str()) {
                OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("WebSocket driver action '{action}' is contract-only and not implemented"))
            } else {
                OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("Unsupported WEBSOCKET action: {action}"))
            };
            steps.push(StepResult::error(index, step_started, err.to_string()));
            break;
        }

        let finished = Utc::now();
        Ok(ScenarioResult {
            scenario_id: scenario.id.clone(),
            status: ScenarioStatus::Error,
            duration_ms: (finished - started).num_milliseconds().max(0) as u64,
            start_time: started,
            end_time: finished,
            error: steps.iter().rev().find_map(|s| s.error.clone()),
            steps,
        })
    }

    async fn cleanup(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use std::collections::HashMap;

    #[tokio::test]
    async fn unknown_action_names_itself_in_the_error() {
        let driver = WebSocketDriver::new();
        let scenario = Scenario {
            id: "w1".into(),
            name: "test".into(),
            description: "".into(),
            priority: Priority::Medium,
            interface: Interface::Websocket,
            prerequisites: vec![],
            steps: vec![crate::model::Step { action: "teleport".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None }],
            verifications: vec![],
            expected_outcome: None,
            tags: vec![],
            enabled: true,
            environment: HashMap::new(),
            cleanup: vec![],
            variables: HashMap::new(),
            estimated_duration: 10,
        };
        let result = driver.execute(&scenario, &VarContext::new(), tokio_util::sync::CancellationToken::new()).await.unwrap();
        assert!(result.error.as_ref().unwrap().contains("Unsupported WEBSOCKET action: teleport"));
    }
}
