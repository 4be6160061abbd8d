//! Agent dispatch port.
//!
//! The [`AgentDispatcher`] trait decouples the orchestration loop from how an
//! agent is actually run. [`CommandDispatcher`] spawns the configured command;
//! [`MockDispatcher`] answers every call with a READY block for dry runs.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::protocol::ProtocolConfig;
use crate::core::types::READY;
use crate::error::DispatchError;
use crate::interrupt::CancelFlag;
use crate::io::config::RunnerConfig;
use crate::io::process::{CommandLimits, run_command};

/// Environment variable carrying the agent name into the spawned command.
pub const AGENT_ENV: &str = "RELAY_AGENT";

/// Bytes of stderr kept in an execution error message.
const STDERR_TAIL_BYTES: usize = 2_000;

/// Abstraction over agent execution backends.
pub trait AgentDispatcher {
    /// Run `agent` with the final `prompt`, returning its raw output.
    fn run(&self, agent: &str, prompt: &str, timeout: Duration) -> Result<String, DispatchError>;
}

impl<T: AgentDispatcher + ?Sized> AgentDispatcher for &T {
    fn run(&self, agent: &str, prompt: &str, timeout: Duration) -> Result<String, DispatchError> {
        (**self).run(agent, prompt, timeout)
    }
}

/// Dispatcher that spawns `runner.command` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    command: Vec<String>,
    workdir: PathBuf,
    output_limit_bytes: usize,
    cancel: CancelFlag,
}

impl CommandDispatcher {
    pub fn new(runner: &RunnerConfig, workdir: impl Into<PathBuf>, cancel: CancelFlag) -> Self {
        Self {
            command: runner.command.clone(),
            workdir: workdir.into(),
            output_limit_bytes: runner.output_limit_bytes,
            cancel,
        }
    }

    fn build_command(&self, agent: &str) -> Result<Command, DispatchError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| DispatchError::Execution {
                agent: agent.to_string(),
                reason: "runner.command is empty".to_string(),
            })?;
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|arg| arg.replace("{agent}", agent)))
            .env(AGENT_ENV, agent)
            .current_dir(&self.workdir);
        Ok(cmd)
    }
}

impl AgentDispatcher for CommandDispatcher {
    #[instrument(skip_all, fields(agent = %agent, timeout_secs = timeout.as_secs()))]
    fn run(&self, agent: &str, prompt: &str, timeout: Duration) -> Result<String, DispatchError> {
        if self.cancel.is_raised() {
            return Err(DispatchError::Interrupted);
        }
        info!(workdir = %self.workdir.display(), "starting agent");

        let cmd = self.build_command(agent)?;
        let output = run_command(
            cmd,
            Some(prompt.as_bytes()),
            CommandLimits {
                timeout,
                output_limit_bytes: self.output_limit_bytes,
                cancel: Some(&self.cancel),
            },
        )
        .map_err(|err| DispatchError::Execution {
            agent: agent.to_string(),
            reason: format!("{err:#}"),
        })?;

        if output.interrupted {
            return Err(DispatchError::Interrupted);
        }
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "agent timed out");
            return Err(DispatchError::Timeout {
                agent: agent.to_string(),
                timeout,
            });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            let stderr = output.stderr_lossy();
            let tail = tail_bytes(stderr.trim(), STDERR_TAIL_BYTES);
            let reason = match output.status.code() {
                Some(code) if tail.is_empty() => format!("exit status {code}"),
                Some(code) => format!("exit status {code}: {tail}"),
                None => format!("terminated by signal: {tail}"),
            };
            return Err(DispatchError::Execution {
                agent: agent.to_string(),
                reason,
            });
        }

        debug!(stdout_bytes = output.stdout.len(), "agent completed");
        Ok(output.stdout_lossy())
    }
}

fn tail_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Dispatcher for `--mock` runs: every agent reports READY immediately.
#[derive(Debug, Clone)]
pub struct MockDispatcher {
    protocol: ProtocolConfig,
}

impl MockDispatcher {
    pub fn new(protocol: &ProtocolConfig) -> Self {
        Self {
            protocol: protocol.clone(),
        }
    }
}

impl AgentDispatcher for MockDispatcher {
    fn run(&self, agent: &str, prompt: &str, _timeout: Duration) -> Result<String, DispatchError> {
        debug!(agent, prompt_chars = prompt.len(), "mock dispatch");
        let p = &self.protocol;
        Ok(format!(
            "[mock] {agent} handled the request.\n\n{}\n{}: {READY}\n{}: mock output from {agent}\n{}\n",
            p.start_marker, p.status_field, p.context_field, p.end_marker
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::StatusParser;

    #[test]
    fn mock_output_parses_as_ready() {
        let protocol = ProtocolConfig::default();
        let output = MockDispatcher::new(&protocol)
            .run("architect", "design it", Duration::from_secs(1))
            .expect("mock run");
        let status = StatusParser::new(protocol).parse(&output);
        assert_eq!(status.status, READY);
        assert_eq!(status.context, "mock output from architect");
    }

    #[test]
    fn tail_bytes_respects_char_boundaries() {
        assert_eq!(tail_bytes("short", 10), "short");
        assert_eq!(tail_bytes("aéb", 2), "b");
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        fn dispatcher(command: &[&str]) -> CommandDispatcher {
            let runner = RunnerConfig {
                command: command.iter().map(|s| s.to_string()).collect(),
                output_limit_bytes: 10_000,
            };
            let workdir = std::env::temp_dir();
            CommandDispatcher::new(&runner, workdir, CancelFlag::new())
        }

        #[test]
        fn substitutes_agent_and_feeds_stdin() {
            let out = dispatcher(&["sh", "-c", "printf '%s:' \"$1\"; cat", "sh", "{agent}"])
                .run("tester", "prompt body", Duration::from_secs(5))
                .expect("run");
            assert_eq!(out, "tester:prompt body");
        }

        #[test]
        fn exposes_agent_in_environment() {
            let out = dispatcher(&["sh", "-c", "printf '%s' \"$RELAY_AGENT\""])
                .run("architect", "", Duration::from_secs(5))
                .expect("run");
            assert_eq!(out, "architect");
        }

        #[test]
        fn nonzero_exit_is_execution_error() {
            let err = dispatcher(&["sh", "-c", "echo broken >&2; exit 3"])
                .run("tester", "", Duration::from_secs(5))
                .unwrap_err();
            match err {
                DispatchError::Execution { agent, reason } => {
                    assert_eq!(agent, "tester");
                    assert_eq!(reason, "exit status 3: broken");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn slow_agent_times_out() {
            let err = dispatcher(&["sleep", "5"])
                .run("tester", "", Duration::from_millis(200))
                .unwrap_err();
            assert!(matches!(err, DispatchError::Timeout { .. }));
        }

        #[test]
        fn raised_flag_interrupts_before_spawn() {
            let flag = CancelFlag::new();
            flag.raise();
            let runner = RunnerConfig {
                command: vec!["sleep".to_string(), "5".to_string()],
                output_limit_bytes: 100,
            };
            let err = CommandDispatcher::new(&runner, std::env::temp_dir(), flag)
                .run("tester", "", Duration::from_secs(5))
                .unwrap_err();
            assert!(matches!(err, DispatchError::Interrupted));
        }
    }
}
