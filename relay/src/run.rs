//! `relay run`: wire config, ports and the orchestration loop together.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use crate::interrupt::CancelFlag;
use crate::io::config::{RELAY_DIR, WorkflowConfig};
use crate::io::dispatch::{AgentDispatcher, CommandDispatcher, MockDispatcher};
use crate::io::interaction::Interaction;
use crate::orchestrator::{Orchestrator, RunOptions, RunOutcome};
use crate::ui::Reporter;

/// Inputs of one `relay run` invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_dir: PathBuf,
    pub prompt: String,
    pub mock: bool,
    pub verbose: bool,
}

/// The project directory to run in.
///
/// An explicit directory wins. Otherwise `cwd` is used, unless only its
/// parent holds a `.relay/` directory (running from a subfolder such as
/// `scripts/`).
pub fn resolve_project_dir(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if !cwd.join(RELAY_DIR).is_dir()
        && let Some(parent) = cwd.parent()
        && parent.join(RELAY_DIR).is_dir()
    {
        debug!(parent = %parent.display(), "using parent directory as project dir");
        return parent.to_path_buf();
    }
    cwd.to_path_buf()
}

/// Run the workflow described by `config` for `request`.
pub fn run_workflow<I: Interaction>(
    request: &RunRequest,
    config: &WorkflowConfig,
    interaction: &I,
    cancel: CancelFlag,
) -> Result<RunOutcome> {
    let session_file = request.project_dir.join(&config.session.state_file);
    let session_exists = session_file.exists();
    let options = RunOptions {
        log_dir: request.project_dir.join(&config.logging.dir),
        cancel: cancel.clone(),
        reporter: Reporter::new(request.verbose, request.mock),
    };
    info!(
        project_dir = %request.project_dir.display(),
        mock = request.mock,
        session_exists,
        "starting workflow run"
    );

    if request.mock {
        let dispatcher = MockDispatcher::new(&config.protocol);
        drive(config, &dispatcher, interaction, options, request, session_exists)
    } else {
        let dispatcher = CommandDispatcher::new(&config.runner, &request.project_dir, cancel);
        drive(config, &dispatcher, interaction, options, request, session_exists)
    }
}

fn drive<D: AgentDispatcher, I: Interaction>(
    config: &WorkflowConfig,
    dispatcher: &D,
    interaction: &I,
    options: RunOptions,
    request: &RunRequest,
    session_exists: bool,
) -> Result<RunOutcome> {
    let orchestrator = Orchestrator::new(config, dispatcher, interaction, options)?;
    orchestrator.run(&request.prompt, session_exists)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::exit_codes;
    use crate::io::init::{InitOptions, init_relay};
    use crate::io::config::load_config;
    use crate::orchestrator::RunStop;
    use crate::test_support::ScriptedInteraction;

    #[test]
    fn explicit_project_dir_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let other = temp.path().join("elsewhere");
        assert_eq!(resolve_project_dir(Some(&other), temp.path()), other);
    }

    #[test]
    fn falls_back_to_parent_holding_relay_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(RELAY_DIR)).expect("mkdir .relay");
        let sub = temp.path().join("scripts");
        fs::create_dir_all(&sub).expect("mkdir scripts");

        assert_eq!(resolve_project_dir(None, &sub), temp.path());
        assert_eq!(resolve_project_dir(None, temp.path()), temp.path());
    }

    /// Verifies the default scaffold completes end to end with the mock dispatcher.
    #[test]
    fn mock_run_of_default_workflow_completes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_relay(temp.path(), &InitOptions { force: false }).expect("init");
        let config = load_config(&paths.config_path).expect("load");
        let request = RunRequest {
            project_dir: temp.path().to_path_buf(),
            prompt: "Add a settings dialog".to_string(),
            mock: true,
            verbose: false,
        };

        let outcome = run_workflow(&request, &config, &ScriptedInteraction::new(), CancelFlag::new())
            .expect("run");

        assert!(matches!(outcome.stop, RunStop::Complete { .. }), "{:?}", outcome.stop);
        assert_eq!(outcome.stop.exit_code(), exit_codes::OK);
        let agents: Vec<&str> = outcome
            .state
            .history()
            .iter()
            .map(|r| r.agent.as_str())
            .collect();
        assert_eq!(
            agents,
            ["task-manager", "architect", "code-writer", "code-reviewer", "tester"]
        );
        let log_path = outcome.log_path.expect("log path");
        assert!(log_path.starts_with(&paths.logs_dir));
    }

    #[test]
    fn session_file_selects_resume_rule() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_relay(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(paths.relay_dir.join("session-state.json"), "{}").expect("write session");
        let config = load_config(&paths.config_path).expect("load");
        let request = RunRequest {
            project_dir: temp.path().to_path_buf(),
            prompt: "continue".to_string(),
            mock: true,
            verbose: false,
        };

        let outcome = run_workflow(&request, &config, &ScriptedInteraction::new(), CancelFlag::new())
            .expect("run");

        assert_eq!(outcome.state.history()[0].rule_id, "resume_session");
    }
}
