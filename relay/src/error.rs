//! Typed errors at the configuration and port boundaries.
//!
//! Application glue uses `anyhow`; these enums exist where callers need to
//! branch on the failure kind (startup exit codes, dispatch outcomes).

use std::time::Duration;

use thiserror::Error;

/// Invalid or missing workflow configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("workflow config not found: {path}")]
    NotFound { path: String },
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("missing required section `{0}`")]
    MissingSection(&'static str),
    #[error("workflow config schema validation failed:\n- {}", .0.join("\n- "))]
    Schema(Vec<String>),
    #[error("no rules configured")]
    NoRules,
    #[error("duplicate rule id `{0}`")]
    DuplicateRule(String),
    #[error("rule `{rule_id}`: {reason}")]
    InvalidRule { rule_id: String, reason: String },
    #[error("no initial rule found (add a rule with `initial = \"start\"`)")]
    NoInitialRule,
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn rule(rule_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule_id: rule_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an agent dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("agent `{agent}` timed out after {}s", .timeout.as_secs())]
    Timeout { agent: String, timeout: Duration },
    #[error("agent `{agent}` failed: {reason}")]
    Execution { agent: String, reason: String },
    #[error("agent dispatch interrupted")]
    Interrupted,
}

/// The user pressed Ctrl-C, during a dispatch or at a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted by user")]
pub struct Interrupted;
