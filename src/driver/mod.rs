// Module: Driver interface (Agent)
// The contract every concrete driver (CLI, TUI, API, WebSocket, GUI)
// satisfies, generalizing the teacher's `executors::StepExecutor` trait
// (can_handle/execute) from one-step-at-a-time to one-scenario-at-a-time,
// per SPEC_FULL.md §4.F: "The router knows drivers only through this
// contract."

pub mod api;
pub mod cli;
pub mod gui;
pub mod tui_driver;
pub mod websocket;

use async_trait::async_trait;

use crate::context::VarContext;
use crate::errors::{ErrorCode, OrchestratorError};
use crate::model::{Interface, Scenario, ScenarioResult};

/// Classifies a step-dispatch error as the `ERROR` (unrecognized/malformed
/// action) or `FAILED` (assertion genuinely did not hold) kind described in
/// SPEC_FULL.md §2/§4.H/§7. `UNSUPPORTED_VALIDATION` is the one usage code
/// that represents a real assertion mismatch rather than a usage mistake,
/// so it alone stays `FAILED`; every other usage error, plus cancellation,
/// is `ERROR`.
pub(crate) fn is_error_not_failure(err: &OrchestratorError) -> bool {
    match err {
        OrchestratorError::Usage(code, _) => *code != ErrorCode::UNSUPPORTED_VALIDATION,
        OrchestratorError::Cancelled(_) => true,
        _ => false,
    }
}

/// A driver instance is shared across every concurrently-running scenario
/// routed to its interface, so it must not hold per-scenario state in
/// `&self` fields — `execute` keeps its scenario-scoped state local to the
/// call.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn interface(&self) -> Interface;

    /// Must be idempotent and side-effect-free outside the driver itself.
    async fn initialize(&self) -> Result<(), OrchestratorError>;

    /// Drives `scenario`'s steps in order. `vars` supplies the
    /// include/scenario/global interpolation layers already resolved by
    /// the loader; `cancel` is observed cooperatively between steps.
    ///
    /// Returns `Err` only when the driver itself threw before producing a
    /// result (SPEC_FULL.md §4.G: "Driver threw before returning a result
    /// -> scenario status ERROR, retry counted"); a scenario whose steps
    /// merely failed still comes back as `Ok` with a `FAILED` status.
    async fn execute(
        &self,
        scenario: &Scenario,
        vars: &VarContext,
        cancel: tokio_util::sync::CancellationToken,
    ) -> Result<ScenarioResult, OrchestratorError>;

    /// Releases all driver-owned resources. Must tolerate being called
    /// without a preceding `initialize()` and must never panic — failures
    /// are logged by the caller, not propagated.
    async fn cleanup(&self) -> Result<(), OrchestratorError>;
}
