// Module: TUI engine
// Input tokenization, ANSI parsing, output stabilization/pattern-wait,
// menu navigation, and output validation — the core of the interactive
// terminal driver. No teacher counterpart; built directly from
// SPEC_FULL.md §4.E, consulting other_examples/groblegark-coop's PTY/TUI
// test harnesses for idiomatic test shape.

pub mod ansi;
pub mod menu;
pub mod stabilize;
pub mod tokens;
pub mod validate;

pub use ansi::{strip_ansi, AnsiParser, StyleState, StyledSpan};
pub use menu::{MenuContext, MenuItem};
pub use stabilize::{stabilize, wait_for_pattern};
pub use tokens::{tokenize, WriteToken};
pub use validate::validate_output;
