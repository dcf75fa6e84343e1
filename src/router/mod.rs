// Module: Scenario router and scheduler
// Dispatches scenarios across drivers with bounded parallelism, priority
// ordering, retry, fail-fast, and cancellation, per SPEC_FULL.md §4.G.
//
// The concurrency shape (Semaphore-bounded JoinSet over a shared result
// vec) is lifted from the teacher's `planner::DagPlanner::execute`, but
// retargeted: the teacher parallelizes steps *within* one scenario's DAG,
// here steps are sequential (owned by the driver) and it is scenarios
// that run in parallel. `retry::execute` isn't reused directly because a
// driver's `Ok(ScenarioResult{status: FAILED})` must itself count as a
// retry-worthy failure, which that helper's `Result`-only contract can't
// express without discarding the populated result on the final attempt.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::VarContext;
use crate::driver::Agent;
use crate::errors::ErrorCode;
use crate::model::{Interface, Priority, Scenario, ScenarioResult, ScenarioStatus, StepResult};
use crate::retry::delay_for_attempt;

/// `interface -> driver` lookup. The router knows drivers only through
/// the `Agent` contract.
pub type AgentRegistry = HashMap<Interface, Arc<dyn Agent>>;

/// Actions that count as "GUI-like" for MIXED-interface routing.
const GUI_LIKE_ACTIONS: &[&str] = &["click", "type", "press", "screenshot", "navigate", "wait_for_element"];
/// Actions that count as "CLI-like" for MIXED-interface routing.
const CLI_LIKE_ACTIONS: &[&str] = &["execute", "run", "runcommand", "validate_exit_code"];

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_parallel: usize,
    pub fail_fast: bool,
    pub retry_count: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { max_parallel: 10, fail_fast: false, retry_count: 0 }
    }
}

/// One event per scenario outcome or router-level problem, replacing the
/// `onResult`/`onFailure` callback pair with a single typed channel.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Result(ScenarioResult),
    Failure { scenario_id: String, message: String },
}

/// MIXED-interface routing: GUI if strictly more GUI-like actions and a
/// GUI agent is registered, else CLI, else "no agent for interface".
fn resolve_interface(scenario: &Scenario, registry: &AgentRegistry) -> Option<Interface> {
    if scenario.interface != Interface::Mixed {
        return Some(scenario.interface);
    }
    let (gui_count, cli_count) = scenario.steps.iter().fold((0, 0), |(g, c), step| {
        let action = step.action.to_lowercase();
        if GUI_LIKE_ACTIONS.contains(&action.as_str()) {
            (g + 1, c)
        } else if CLI_LIKE_ACTIONS.contains(&action.as_str()) {
            (g, c + 1)
        } else {
            (g, c)
        }
    });
    if gui_count > cli_count && registry.contains_key(&Interface::Gui) {
        return Some(Interface::Gui);
    }
    if registry.contains_key(&Interface::Cli) {
        return Some(Interface::Cli);
    }
    None
}

/// Runs one scenario to completion under the retry policy, per the
/// failure-semantics table in SPEC_FULL.md §4.G: a driver throw or a
/// `FAILED` result both count as a retry-worthy attempt failure; `cleanup`
/// always runs and its own failure is logged, never surfaced.
async fn run_scenario_with_retry(
    agent: &dyn Agent,
    scenario: &Scenario,
    vars: &VarContext,
    cancel: CancellationToken,
    retry_count: u32,
) -> ScenarioResult {
    let max_attempts = retry_count + 1;
    let mut last: Option<ScenarioResult> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = delay_for_attempt(
                &crate::retry::RetryOptions::default(),
                attempt,
            );
            tokio::time::sleep(delay).await;
        }

        if cancel.is_cancelled() {
            break;
        }

        if let Err(err) = agent.initialize().await {
            tracing::warn!(scenario_id = %scenario.id, attempt, error = %err, "driver initialize() failed");
            let now = Utc::now();
            last = Some(ScenarioResult {
                scenario_id: scenario.id.clone(),
                status: ScenarioStatus::Error,
                duration_ms: 0,
                start_time: now,
                end_time: now,
                error: Some(err.to_string()),
                steps: Vec::new(),
            });
            run_cleanup(agent, &scenario.id).await;
            continue;
        }

        let outcome = agent.execute(scenario, vars, cancel.clone()).await;
        run_cleanup(agent, &scenario.id).await;

        match outcome {
            Ok(result) if result.status == ScenarioStatus::Passed => return result,
            Ok(result) => {
                let should_stop = attempt == max_attempts || cancel.is_cancelled();
                last = Some(result);
                if should_stop {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(scenario_id = %scenario.id, attempt, error = %err, "driver execute() threw");
                let now = Utc::now();
                last = Some(ScenarioResult {
                    scenario_id: scenario.id.clone(),
                    status: ScenarioStatus::Error,
                    duration_ms: 0,
                    start_time: now,
                    end_time: now,
                    error: Some(err.to_string()),
                    steps: Vec::new(),
                });
                if attempt == max_attempts {
                    break;
                }
            }
        }
    }

    last.unwrap_or_else(|| {
        let now = Utc::now();
        ScenarioResult {
            scenario_id: scenario.id.clone(),
            status: ScenarioStatus::Error,
            duration_ms: 0,
            start_time: now,
            end_time: now,
            error: Some("no attempt ran".to_string()),
            steps: Vec::new(),
        }
    })
}

async fn run_cleanup(agent: &dyn Agent, scenario_id: &str) {
    if let Err(err) = agent.cleanup().await {
        tracing::warn!(scenario_id, error = %err, "driver cleanup() failed (ignored)");
    }
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

/// Dispatches every scenario in `scenarios`, returning once all have
/// reached a terminal status. Emits a `RouterEvent` per scenario (plus
/// router-level `Failure`s) on `events` as they complete.
pub async fn run(
    scenarios: Vec<Scenario>,
    registry: Arc<AgentRegistry>,
    vars: VarContext,
    config: RouterConfig,
    cancel: CancellationToken,
) -> (Vec<ScenarioResult>, mpsc::UnboundedReceiver<RouterEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut queue: Vec<Scenario> = scenarios;
    queue.sort_by_key(|s| priority_rank(s.priority));

    let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
    let mut join_set: JoinSet<ScenarioResult> = JoinSet::new();

    for scenario in queue {
        if cancel.is_cancelled() {
            let result = ScenarioResult::skipped(&scenario.id);
            let _ = tx.send(RouterEvent::Result(result));
            continue;
        }

        if !scenario.enabled {
            let result = ScenarioResult::skipped(&scenario.id);
            let _ = tx.send(RouterEvent::Result(result));
            continue;
        }

        let Some(interface) = resolve_interface(&scenario, &registry) else {
            let message = format!(
                "[{}] no agent for interface {:?}",
                ErrorCode::NO_AGENT_FOR_INTERFACE,
                scenario.interface
            );
            let _ = tx.send(RouterEvent::Failure { scenario_id: scenario.id.clone(), message: message.clone() });
            let now = Utc::now();
            let result = ScenarioResult {
                scenario_id: scenario.id.clone(),
                status: ScenarioStatus::Error,
                duration_ms: 0,
                start_time: now,
                end_time: now,
                error: Some(message),
                steps: Vec::<StepResult>::new(),
            };
            let _ = tx.send(RouterEvent::Result(result));
            continue;
        };

        let Some(agent) = registry.get(&interface).cloned() else {
            let message = format!("[{}] no agent for interface {:?}", ErrorCode::NO_AGENT_FOR_INTERFACE, interface);
            let _ = tx.send(RouterEvent::Failure { scenario_id: scenario.id.clone(), message });
            continue;
        };

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
        let vars = vars.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();
        let retry_count = config.retry_count;
        let fail_fast = config.fail_fast;
        let cancel_for_dispatch = cancel.clone();

        join_set.spawn(async move {
            let _permit = permit;
            let result = run_scenario_with_retry(agent.as_ref(), &scenario, &vars, cancel, retry_count).await;

            if fail_fast && matches!(result.status, ScenarioStatus::Failed | ScenarioStatus::Error) {
                cancel_for_dispatch.cancel();
            }

            let _ = tx.send(RouterEvent::Result(result.clone()));
            result
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }

    (results, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrchestratorError;
    use crate::model::Step;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scenario(id: &str, priority: Priority, interface: Interface, enabled: bool) -> Scenario {
        Scenario {
            id: id.into(),
            name: id.into(),
            description: "".into(),
            priority,
            interface,
            prerequisites: vec![],
            steps: vec![Step { action: "execute".into(), target: "true".into(), value: None, wait_for: None, timeout: None, expected: None }],
            verifications: vec![],
            expected_outcome: None,
            tags: vec![],
            enabled,
            environment: StdHashMap::new(),
            cleanup: vec![],
            variables: StdHashMap::new(),
            estimated_duration: 1,
        }
    }

    struct AlwaysPass;

    #[async_trait]
    impl Agent for AlwaysPass {
        fn name(&self) -> &str {
            "always-pass"
        }
        fn interface(&self) -> Interface {
            Interface::Cli
        }
        async fn initialize(&self) -> Result<(), OrchestratorError> {
            Ok(())
        }
        async fn execute(&self, scenario: &Scenario, _vars: &VarContext, _cancel: CancellationToken) -> Result<ScenarioResult, OrchestratorError> {
            let now = Utc::now();
            Ok(ScenarioResult {
                scenario_id: scenario.id.clone(),
                status: ScenarioStatus::Passed,
                duration_ms: 0,
                start_time: now,
                end_time: now,
                error: None,
                steps: vec![StepResult::ok(0, now, None)],
            })
        }
        async fn cleanup(&self) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    struct FailsNTimes {
        remaining: AtomicU32,
    }

    #[async_trait]
    impl Agent for FailsNTimes {
        fn name(&self) -> &str {
            "fails-n-times"
        }
        fn interface(&self) -> Interface {
            Interface::Cli
        }
        async fn initialize(&self) -> Result<(), OrchestratorError> {
            Ok(())
        }
        async fn execute(&self, scenario: &Scenario, _vars: &VarContext, _cancel: CancellationToken) -> Result<ScenarioResult, OrchestratorError> {
            let now = Utc::now();
            if self.remaining.load(Ordering::SeqCst) > 0 {
                self.remaining.fetch_sub(1, Ordering::SeqCst);
                return Ok(ScenarioResult {
                    scenario_id: scenario.id.clone(),
                    status: ScenarioStatus::Failed,
                    duration_ms: 0,
                    start_time: now,
                    end_time: now,
                    error: Some("not yet".into()),
                    steps: vec![],
                });
            }
            Ok(ScenarioResult {
                scenario_id: scenario.id.clone(),
                status: ScenarioStatus::Passed,
                duration_ms: 0,
                start_time: now,
                end_time: now,
                error: None,
                steps: vec![StepResult::ok(0, now, None)],
            })
        }
        async fn cleanup(&self) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn disabled_scenarios_are_skipped_without_a_driver() {
        let registry: AgentRegistry = HashMap::new();
        let scenarios = vec![scenario("s1", Priority::Medium, Interface::Cli, false)];
        let (results, _rx) = run(scenarios, Arc::new(registry), VarContext::new(), RouterConfig::default(), CancellationToken::new()).await;
        assert_eq!(results.len(), 0); // disabled scenarios never reach the JoinSet; only the event is emitted
    }

    #[tokio::test]
    async fn passes_on_first_attempt() {
        let mut registry: AgentRegistry = HashMap::new();
        registry.insert(Interface::Cli, Arc::new(AlwaysPass));
        let scenarios = vec![scenario("s1", Priority::High, Interface::Cli, true)];
        let (results, _rx) = run(scenarios, Arc::new(registry), VarContext::new(), RouterConfig::default(), CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ScenarioStatus::Passed);
    }

    #[tokio::test]
    async fn retries_then_passes() {
        let mut registry: AgentRegistry = HashMap::new();
        registry.insert(Interface::Cli, Arc::new(FailsNTimes { remaining: AtomicU32::new(2) }));
        let scenarios = vec![scenario("s1", Priority::Medium, Interface::Cli, true)];
        let config = RouterConfig { retry_count: 2, ..RouterConfig::default() };
        let (results, _rx) = run(scenarios, Arc::new(registry), VarContext::new(), config, CancellationToken::new()).await;
        assert_eq!(results[0].status, ScenarioStatus::Passed);
    }

    #[tokio::test]
    async fn missing_agent_emits_error_result() {
        let registry: AgentRegistry = HashMap::new();
        let scenarios = vec![scenario("s1", Priority::Medium, Interface::Cli, true)];
        let (results, _rx) = run(scenarios, Arc::new(registry), VarContext::new(), RouterConfig::default(), CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ScenarioStatus::Error);
        assert!(results[0].error.as_ref().unwrap().contains("no agent for interface"));
    }

    #[tokio::test]
    async fn mixed_routes_to_cli_when_cli_actions_dominate() {
        let mut s = scenario("s1", Priority::Medium, Interface::Mixed, true);
        s.steps = vec![
            Step { action: "execute".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None },
            Step { action: "validate_exit_code".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None },
            Step { action: "click".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None },
        ];
        let mut registry: AgentRegistry = HashMap::new();
        registry.insert(Interface::Cli, Arc::new(AlwaysPass));
        let resolved = resolve_interface(&s, &registry);
        assert_eq!(resolved, Some(Interface::Cli));
    }

    #[test]
    fn mixed_prefers_gui_when_gui_actions_dominate_and_registered() {
        let mut s = scenario("s1", Priority::Medium, Interface::Mixed, true);
        s.steps = vec![
            Step { action: "click".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None },
            Step { action: "type".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None },
            Step { action: "execute".into(), target: "".into(), value: None, wait_for: None, timeout: None, expected: None },
        ];
        let mut registry: AgentRegistry = HashMap::new();
        registry.insert(Interface::Gui, Arc::new(AlwaysPass));
        let resolved = resolve_interface(&s, &registry);
        assert_eq!(resolved, Some(Interface::Gui));
    }
}
