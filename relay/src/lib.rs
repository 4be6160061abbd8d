//! Rule-driven orchestration of multi-agent workflows.
//!
//! relay runs one agent at a time, reads the status block the agent ends its
//! output with, and looks up the next step in an ordered rule set until a
//! rule completes the workflow, something fails, or the user stops it.
//!
//! - **[`core`]**: Pure, deterministic logic (status parsing, rule matching,
//!   run state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, agent processes,
//!   terminal prompts, run logs). Behind traits where tests need to swap them.
//!
//! [`orchestrator`] drives the loop; [`run`] and [`validate`] implement the
//! CLI commands on top of it.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod ui;
pub mod validate;
