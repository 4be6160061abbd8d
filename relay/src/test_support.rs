//! Test-only helpers: scripted ports, rule builders and throwaway projects.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use crate::core::protocol::ProtocolConfig;
use crate::core::rules::{
    Action, DecisionOption, ExhaustedAction, InitialKind, OnExhausted, RetryPolicy, Rule,
    RuleMatcher,
};
use crate::core::state::Limits;
use crate::error::{DispatchError, Interrupted};
use crate::interrupt::CancelFlag;
use crate::io::config::{
    LoggingConfig, PromptInjectionConfig, RELAY_DIR, RunnerConfig, SessionConfig, TOML_FILE,
    WorkflowConfig, default_agents,
};
use crate::io::dispatch::AgentDispatcher;
use crate::io::interaction::{Fallback, Interaction};
use crate::orchestrator::RunOptions;
use crate::ui::Reporter;

/// Canned result of one dispatch.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(String),
    Timeout,
    Error(String),
    /// Behaves like Ctrl-C arriving while the agent runs.
    Interrupt,
}

/// A dispatch as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCall {
    pub agent: String,
    pub prompt: String,
    pub timeout: Duration,
}

/// Dispatcher replaying a fixed script of replies.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    replies: RefCell<VecDeque<ScriptedReply>>,
    calls: RefCell<Vec<DispatchCall>>,
    cancel: Option<CancelFlag>,
}

impl ScriptedDispatcher {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Raise `flag` when an [`ScriptedReply::Interrupt`] is replayed.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.borrow().clone()
    }

    pub fn agents_called(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.agent.clone()).collect()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.borrow().len();
        assert_eq!(left, 0, "{left} scripted replies were never used");
    }
}

impl AgentDispatcher for ScriptedDispatcher {
    fn run(&self, agent: &str, prompt: &str, timeout: Duration) -> Result<String, DispatchError> {
        self.calls.borrow_mut().push(DispatchCall {
            agent: agent.to_string(),
            prompt: prompt.to_string(),
            timeout,
        });
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted reply left for agent `{agent}`"));
        match reply {
            ScriptedReply::Output(output) => Ok(output),
            ScriptedReply::Timeout => Err(DispatchError::Timeout {
                agent: agent.to_string(),
                timeout,
            }),
            ScriptedReply::Error(reason) => Err(DispatchError::Execution {
                agent: agent.to_string(),
                reason,
            }),
            ScriptedReply::Interrupt => {
                if let Some(flag) = &self.cancel {
                    flag.raise();
                }
                Err(DispatchError::Interrupted)
            }
        }
    }
}

/// Interaction answering from queues. An empty queue declines.
#[derive(Debug, Default)]
pub struct ScriptedInteraction {
    limit_answers: RefCell<VecDeque<Result<bool, Interrupted>>>,
    fallback_answers: RefCell<VecDeque<Result<Option<Fallback>, Interrupted>>>,
    decision_answers: RefCell<VecDeque<Result<Option<String>, Interrupted>>>,
    limit_reasons: RefCell<Vec<String>>,
    fallback_offers: RefCell<Vec<Vec<String>>>,
    decision_messages: RefCell<Vec<String>>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn continue_after_limit(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.limit_answers
            .borrow_mut()
            .extend(answers.into_iter().map(Ok));
        self
    }

    pub fn interrupt_on_limit(self) -> Self {
        self.limit_answers.borrow_mut().push_back(Err(Interrupted));
        self
    }

    pub fn fallback_to(self, agent: &str, prompt: &str) -> Self {
        self.fallback_answers.borrow_mut().push_back(Ok(Some(Fallback {
            agent: agent.to_string(),
            prompt: prompt.to_string(),
        })));
        self
    }

    pub fn decline_fallback(self) -> Self {
        self.fallback_answers.borrow_mut().push_back(Ok(None));
        self
    }

    pub fn interrupt_on_fallback(self) -> Self {
        self.fallback_answers.borrow_mut().push_back(Err(Interrupted));
        self
    }

    /// Pick the decision option with this label.
    pub fn choose(self, label: &str) -> Self {
        self.decision_answers
            .borrow_mut()
            .push_back(Ok(Some(label.to_string())));
        self
    }

    pub fn decline_decision(self) -> Self {
        self.decision_answers.borrow_mut().push_back(Ok(None));
        self
    }

    pub fn limit_reasons(&self) -> Vec<String> {
        self.limit_reasons.borrow().clone()
    }

    /// Agent lists offered by each fallback prompt.
    pub fn fallback_offers(&self) -> Vec<Vec<String>> {
        self.fallback_offers.borrow().clone()
    }

    pub fn decision_messages(&self) -> Vec<String> {
        self.decision_messages.borrow().clone()
    }
}

impl Interaction for ScriptedInteraction {
    fn ask_continue_after_limit(&self, reason: &str) -> Result<bool, Interrupted> {
        self.limit_reasons.borrow_mut().push(reason.to_string());
        self.limit_answers.borrow_mut().pop_front().unwrap_or(Ok(false))
    }

    fn ask_fallback(&self, agents: &[String]) -> Result<Option<Fallback>, Interrupted> {
        self.fallback_offers.borrow_mut().push(agents.to_vec());
        self.fallback_answers.borrow_mut().pop_front().unwrap_or(Ok(None))
    }

    fn ask_decision<'a>(
        &self,
        message: &str,
        options: &'a [DecisionOption],
    ) -> Result<Option<&'a DecisionOption>, Interrupted> {
        self.decision_messages.borrow_mut().push(message.to_string());
        let answer = self.decision_answers.borrow_mut().pop_front().unwrap_or(Ok(None))?;
        Ok(answer.map(|label| {
            options
                .iter()
                .find(|o| o.label == label)
                .unwrap_or_else(|| panic!("no decision option labelled `{label}`"))
        }))
    }
}

/// Agent output ending in a status block with the default markers.
pub fn status_block(status: &str, context: &str) -> String {
    let p = ProtocolConfig::default();
    format!(
        "working...\n\n{}\n{}: {status}\n{}: {context}\n{}\n",
        p.start_marker, p.status_field, p.context_field, p.end_marker
    )
}

/// Initial rule starting the run with `agent` and the task as prompt.
pub fn start_rule(id: &str, agent: &str) -> Rule {
    Rule {
        id: id.to_string(),
        description: String::new(),
        initial: Some(InitialKind::Start),
        matcher: RuleMatcher::default(),
        action: Action::Transition {
            agent: agent.to_string(),
            prompt: None,
        },
        retry: None,
    }
}

fn matching(id: &str, agent: &str, status: &str, action: Action) -> Rule {
    Rule {
        id: id.to_string(),
        description: String::new(),
        initial: None,
        matcher: RuleMatcher {
            agent: agent.to_string(),
            status: status.to_string(),
            context_pattern: None,
        },
        action,
        retry: None,
    }
}

pub fn transition_rule(id: &str, agent: &str, status: &str, next: &str, prompt: &str) -> Rule {
    matching(
        id,
        agent,
        status,
        Action::Transition {
            agent: next.to_string(),
            prompt: Some(prompt.to_string()),
        },
    )
}

pub fn complete_rule(id: &str, agent: &str, status: &str) -> Rule {
    matching(
        id,
        agent,
        status,
        Action::Complete {
            message: format!("{id} reached"),
        },
    )
}

/// Decision rule offering `(label, agent)` pairs.
pub fn decision_rule(id: &str, agent: &str, status: &str, options: &[(&str, &str)]) -> Rule {
    matching(
        id,
        agent,
        status,
        Action::Decision {
            message: format!("{id}?"),
            prompt_template: None,
            options: options
                .iter()
                .map(|(label, agent)| DecisionOption {
                    label: label.to_string(),
                    agent: agent.to_string(),
                    prompt: None,
                })
                .collect(),
        },
    )
}

pub fn with_retry(mut rule: Rule, max: u32, kind: ExhaustedAction) -> Rule {
    rule.retry = Some(RetryPolicy {
        max,
        on_exhausted: OnExhausted {
            kind,
            message: "Retry limit reached".to_string(),
        },
    });
    rule
}

/// Config with default sections and protocol injection disabled, so
/// dispatched prompts equal the rendered rule prompts.
pub fn test_config(rules: Vec<Rule>) -> WorkflowConfig {
    WorkflowConfig {
        protocol: ProtocolConfig::default(),
        limits: Limits::default(),
        rules,
        prompt_injection: PromptInjectionConfig {
            enabled: false,
            template: None,
        },
        runner: RunnerConfig::default(),
        agents: default_agents(),
        session: SessionConfig::default(),
        logging: LoggingConfig::default(),
    }
}

/// Temporary project directory.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.path().join(RELAY_DIR).join("logs")
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            log_dir: self.log_dir(),
            cancel: CancelFlag::new(),
            reporter: Reporter::default(),
        }
    }

    /// Write `.relay/workflow.toml`.
    pub fn write_config(&self, contents: &str) -> PathBuf {
        let dir = self.path().join(RELAY_DIR);
        fs::create_dir_all(&dir).expect("create .relay");
        let path = dir.join(TOML_FILE);
        fs::write(&path, contents).expect("write config");
        path
    }

    pub fn log_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.log_dir()) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
