//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between the parser, the rule engine and
//! the state tracker. They carry no behavior that touches the outside world.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status value an agent reports when it finished its part.
pub const READY: &str = "READY";
/// Status value an agent reports when it could not finish.
pub const FAILED: &str = "FAILED";
/// Reserved status for output the parser could not interpret.
pub const UNKNOWN: &str = "UNKNOWN";

/// `source` of statuses produced by the parser's degradation path.
pub const SOURCE_FALLBACK: &str = "fallback";
/// `source` of statuses parsed from a block that did not name its source.
pub const SOURCE_PROTOCOL: &str = "protocol";
/// `source` of statuses synthesized from a dispatch failure.
pub const SOURCE_DISPATCH: &str = "dispatch";

/// Rule id recorded for steps chosen by the user through the fallback prompt.
pub const MANUAL_RULE_ID: &str = "manual";
/// Suffix appended to the rule id of steps chosen through a decision prompt.
pub const DECISION_SUFFIX: &str = "_decision";

/// Parsed outcome of a single agent invocation. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
    pub context: String,
    pub source: String,
}

impl Status {
    pub fn new(
        status: impl Into<String>,
        context: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            status: status.into(),
            context: context.into(),
            source: source.into(),
        }
    }

    /// Degraded status for output without a usable status block.
    pub fn unknown(context: impl Into<String>) -> Self {
        Self::new(UNKNOWN, context, SOURCE_FALLBACK)
    }

    /// FAILED status for an invocation that never produced output.
    pub fn dispatch_failure(context: impl Into<String>) -> Self {
        Self::new(FAILED, context, SOURCE_DISPATCH)
    }

    pub fn is_failed(&self) -> bool {
        self.status == FAILED
    }

    pub fn is_unknown(&self) -> bool {
        self.status == UNKNOWN
    }
}

/// One completed agent invocation, as kept in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// 1-based number of the invocation this record describes.
    pub iteration: u32,
    pub agent: String,
    /// Prompt before protocol injection.
    pub prompt: String,
    pub status: Status,
    pub duration_secs: f64,
    /// Rule that scheduled this invocation.
    pub rule_id: String,
    pub timestamp: DateTime<Utc>,
}
