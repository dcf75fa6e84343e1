//! Agentic end-to-end test orchestrator.
//!
//! Drives black-box scenarios declared in YAML against heterogeneous
//! interfaces (CLI, TUI, API, WebSocket, GUI) through a common `Agent`
//! contract. The crate is organized leaf-first, mirroring the component
//! dependency order: retry/circuit-breaker, YAML loader, process lifecycle
//! manager, PTY session manager, TUI engine, driver contract, router, and
//! the structured logging context threaded through all of them.

pub mod config;
pub mod context;
pub mod driver;
pub mod errors;
pub mod loader;
pub mod model;
pub mod process;
pub mod pty;
pub mod retry;
pub mod router;
pub mod telemetry;
pub mod tui;
