// Module: Context/logger plumbing
// Two concerns live here: variable resolution for `${a.b.c}` interpolation
// (used by the loader) and the scoped structured-logging context threaded
// through router/driver calls (component I in SPEC_FULL.md §2).
//
// The variable-resolution half is adapted from the teacher's
// `context::Context`; the teacher errors on an unresolvable token, this
// one preserves the literal `${...}` unchanged, per SPEC_FULL.md §4.B.

pub mod scope;
pub mod vars;

pub use scope::LogScope;
pub use vars::VarContext;
