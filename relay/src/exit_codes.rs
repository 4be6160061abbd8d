//! Stable exit codes for relay CLI commands.

/// Command succeeded; for `relay run`, the workflow reached a `complete` rule.
pub const OK: i32 = 0;
/// Startup failed: missing or invalid config, bad arguments, I/O errors.
pub const INVALID: i32 = 1;
/// The workflow failed (agent FAILED, retries exhausted, limit declined).
pub const FAILED: i32 = 2;
/// The workflow stopped because the user declined a fallback or decision.
pub const INCONCLUSIVE: i32 = 3;
/// The run was interrupted with Ctrl-C.
pub const INTERRUPTED: i32 = 130;
