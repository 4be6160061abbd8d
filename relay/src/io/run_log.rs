//! Run log artifacts written to `.relay/logs/`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::state::WorkflowState;
use crate::core::types::ExecutionRecord;

/// Suffixes tried before giving up on a unique file name.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// On-disk shape of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
    pub complete: bool,
    pub failed: bool,
    pub iterations: u32,
    pub retry_counts: BTreeMap<String, u32>,
    pub history: Vec<ExecutionRecord>,
}

impl RunLog {
    pub fn from_state(state: &WorkflowState) -> Self {
        Self {
            started_at: state.started_at(),
            finished_at: Utc::now(),
            outcome: state.outcome().to_string(),
            complete: state.is_complete(),
            failed: state.is_failed(),
            iterations: state.iteration(),
            retry_counts: state.retry_counts().clone(),
            history: state.history().to_vec(),
        }
    }
}

impl WorkflowState {
    /// Write the run log into `dir` as `run-YYYYMMDD-HHMMSS[-N].json`.
    ///
    /// Existing files are never overwritten; a numeric suffix is added instead.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn save_log(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;

        let log = RunLog::from_state(self);
        let mut buf = serde_json::to_string_pretty(&log).context("serialize run log")?;
        buf.push('\n');

        let stem = format!("run-{}", log.started_at.format("%Y%m%d-%H%M%S"));
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}-{attempt}.json")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(buf.as_bytes())
                        .with_context(|| format!("write {}", path.display()))?;
                    debug!(path = %path.display(), "run log written");
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create {}", path.display()));
                }
            }
        }
        bail!("no free run log name for {stem} in {}", dir.display())
    }
}

/// Read a run log back, e.g. for inspection tooling and tests.
pub fn load_run_log(path: &Path) -> Result<RunLog> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Limits;
    use crate::core::types::Status;

    fn sample_state() -> WorkflowState {
        let mut state = WorkflowState::new(Limits::default());
        state.record(
            "task-manager",
            "plan it",
            Status::new("READY", "planned", "protocol"),
            1.5,
            "start",
        );
        state.increment_retry("review");
        state.mark_complete();
        state
    }

    #[test]
    fn writes_every_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = sample_state();

        let path = state.save_log(&temp.path().join("logs")).expect("save");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("run-") && name.ends_with(".json"), "{name}");

        let log = load_run_log(&path).expect("load");
        assert_eq!(log.outcome, "complete");
        assert!(log.complete);
        assert_eq!(log.iterations, 1);
        assert_eq!(log.history, state.history());
        assert_eq!(log.retry_counts.get("review"), Some(&1));
    }

    #[test]
    fn never_overwrites_existing_logs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = sample_state();

        let first = state.save_log(temp.path()).expect("first");
        let second = state.save_log(temp.path()).expect("second");
        assert_ne!(first, second);
        assert!(first.is_file());
        assert!(second.is_file());
    }

    #[test]
    fn saving_does_not_mutate_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = sample_state();
        let before = state.history().to_vec();
        state.save_log(temp.path()).expect("save");
        assert_eq!(state.history(), before.as_slice());
        assert_eq!(state.iteration(), 1);
    }
}
