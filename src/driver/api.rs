// HTTP/API driver contract. The Agent interface and its action vocabulary
// are in scope; an actual wire implementation using `reqwest` (as the
// teacher's `executors::http::HttpExecutor` does for single-step requests)
// is an explicit Non-goal here. Every recognized action reports itself as
// not implemented rather than silently doing nothing, so a scenario
// mistakenly routed here fails loudly with a distinguishable message.

use async_trait::async_trait;
use chrono::Utc;

use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Scenario, ScenarioResult, ScenarioStatus, StepResult};

use super::Agent;

const ACTIONS: &[&str] = &[
    "request", "get", "post", "put", "patch", "delete",
    "validate_status", "validate_body", "validate_header", "validate_latency", "validate_schema",
    "extract", "set_header", "set_auth", "wait",
];

pub struct ApiDriver;

impl Default for ApiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ApiDriver {
    fn name(&self) -> &str {
        "api"
    }

    fn interface(&self) -> Interface {
        Interface::Api
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
                OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("API driver action '{action}' is contract-only and not implemented"))
            } else {
                OrchestratorError::usage(ErrorCode::UNSUPPORTED_ACTION, format!("Unsupported API action: {action}"))
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
    async fn recognized_action_reports_not_implemented() {
        let driver = ApiDriver::new();
        let scenario = Scenario {
            id: "a1".into(),
            name: "test".into(),
            description: "".into(),
            priority: Priority::Medium,
            interface: Interface::Api,
            prerequisites: vec![],
            steps: vec![crate::model::Step { action: "get".into(), target: "/health".into(), value: None, wait_for: None, timeout: None, expected: None }],
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
        assert_eq!(result.status, ScenarioStatus::Error);
        assert!(result.error.as_ref().unwrap().contains("contract-only"));
    }
}
