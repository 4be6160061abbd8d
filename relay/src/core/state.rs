//! Run-scoped state: iteration counter, retry budgets, history, loop detection.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{ExecutionRecord, Status};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_iterations: u32,
    pub agent_timeout_seconds: u64,
    pub loop_window_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            agent_timeout_seconds: 300,
            loop_window_size: 3,
        }
    }
}

impl Limits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("limits.max_iterations", "must be > 0"));
        }
        if self.agent_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "limits.agent_timeout_seconds",
                "must be > 0",
            ));
        }
        if self.loop_window_size == 0 {
            return Err(ConfigError::invalid("limits.loop_window_size", "must be > 0"));
        }
        Ok(())
    }
}

/// Mutable state of one run. Owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    iteration: u32,
    retry_counts: BTreeMap<String, u32>,
    history: Vec<ExecutionRecord>,
    complete: bool,
    failed: bool,
    interrupted: bool,
    limits: Limits,
    started_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(limits: Limits) -> Self {
        Self {
            iteration: 0,
            retry_counts: BTreeMap::new(),
            history: Vec::new(),
            complete: false,
            failed: false,
            interrupted: false,
            limits,
            started_at: Utc::now(),
        }
    }

    /// Number of completed invocations.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Number the next invocation will carry once recorded.
    pub fn next_iteration(&self) -> u32 {
        self.iteration + 1
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    pub fn retry_counts(&self) -> &BTreeMap<String, u32> {
        &self.retry_counts
    }

    pub fn retry_count(&self, rule_id: &str) -> u32 {
        self.retry_counts.get(rule_id).copied().unwrap_or(0)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Append a record for a finished invocation and advance the counter.
    pub fn record(
        &mut self,
        agent: &str,
        prompt: &str,
        status: Status,
        duration_secs: f64,
        rule_id: &str,
    ) -> &ExecutionRecord {
        self.iteration += 1;
        self.history.push(ExecutionRecord {
            iteration: self.iteration,
            agent: agent.to_string(),
            prompt: prompt.to_string(),
            status,
            duration_secs,
            rule_id: rule_id.to_string(),
            timestamp: Utc::now(),
        });
        let last = self.history.len() - 1;
        &self.history[last]
    }

    pub fn is_at_limit(&self) -> bool {
        self.iteration >= self.limits.max_iterations
    }

    /// True when the trailing window of `(agent, rule_id)` pairs repeats an
    /// earlier window that does not overlap it.
    pub fn is_in_loop(&self) -> bool {
        fn key(record: &ExecutionRecord) -> (&str, &str) {
            (record.agent.as_str(), record.rule_id.as_str())
        }

        let window = self.limits.loop_window_size;
        let len = self.history.len();
        if window == 0 || len < window * 2 {
            return false;
        }

        let tail: Vec<_> = self.history[len - window..].iter().map(key).collect();
        (0..=len - 2 * window).any(|start| {
            self.history[start..start + window]
                .iter()
                .map(key)
                .eq(tail.iter().copied())
        })
    }

    pub fn can_retry(&self, rule_id: &str, max: u32) -> bool {
        self.retry_count(rule_id) < max
    }

    pub fn increment_retry(&mut self, rule_id: &str) -> u32 {
        let count = self.retry_counts.entry(rule_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn mark_complete(&mut self) {
        if !self.failed {
            self.complete = true;
        }
    }

    pub fn mark_failed(&mut self) {
        if !self.complete {
            self.failed = true;
        }
    }

    /// Interruption is a failure that is reported separately.
    pub fn mark_interrupted(&mut self) {
        if !self.complete {
            self.failed = true;
            self.interrupted = true;
        }
    }

    pub fn outcome(&self) -> &'static str {
        if self.complete {
            "complete"
        } else if self.interrupted {
            "interrupted"
        } else if self.failed {
            "failed"
        } else {
            "incomplete"
        }
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.history.iter().map(|r| r.duration_secs).sum()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Workflow summary");
        let _ = writeln!(out, "  outcome:    {}", self.outcome());
        let _ = writeln!(
            out,
            "  iterations: {}/{}",
            self.iteration, self.limits.max_iterations
        );
        let _ = writeln!(out, "  duration:   {:.1}s", self.total_duration_secs());

        if !self.history.is_empty() {
            let _ = writeln!(out, "  timeline:");
            for record in &self.history {
                let _ = writeln!(
                    out,
                    "    {:>3}. {:<16} {:<8} {:>7.1}s  ({})",
                    record.iteration,
                    record.agent,
                    record.status.status,
                    record.duration_secs,
                    record.rule_id
                );
            }
        }

        if !self.retry_counts.is_empty() {
            let _ = writeln!(out, "  retries:");
            for (rule_id, count) in &self.retry_counts {
                let _ = writeln!(out, "    {rule_id}: {count}");
            }
        }
        out
    }
}
