//! The orchestration loop: dispatch, parse, route, repeat.
//!
//! One [`Orchestrator`] drives one run. It owns the run's [`WorkflowState`]
//! and is the only place that decides when a run is over. Everything the loop
//! cannot decide on its own goes through the [`Interaction`] port.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::protocol::StatusParser;
use crate::core::rules::{Action, ExhaustedAction, Rule, RuleEngine};
use crate::core::state::WorkflowState;
use crate::core::template::{Placeholders, render};
use crate::core::types::{DECISION_SUFFIX, MANUAL_RULE_ID, Status};
use crate::error::{ConfigError, DispatchError, Interrupted};
use crate::exit_codes;
use crate::interrupt::CancelFlag;
use crate::io::config::WorkflowConfig;
use crate::io::dispatch::AgentDispatcher;
use crate::io::interaction::Interaction;
use crate::io::prompt::PromptInjector;
use crate::ui::Reporter;

/// Prompt template of transitions that do not configure one.
pub const DEFAULT_TRANSITION_PROMPT: &str = "Continue workflow";
/// Prompt template of initial rules and decisions that do not configure one.
pub const DEFAULT_CONTEXT_PROMPT: &str = "{context}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    AwaitingUserFallback,
    AwaitingUserDecision,
    Complete,
    Failed,
    Interrupted,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// A `complete` rule matched.
    Complete { message: String },
    /// An agent failed, a retry budget ran out, or the user declined to go on
    /// past a limit.
    Failed { reason: String },
    /// The user declined a fallback or decision prompt.
    Inconclusive { reason: String },
    Interrupted,
}

impl RunStop {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete { .. } => exit_codes::OK,
            Self::Failed { .. } => exit_codes::FAILED,
            Self::Inconclusive { .. } => exit_codes::INCONCLUSIVE,
            Self::Interrupted => exit_codes::INTERRUPTED,
        }
    }
}

/// Result of [`Orchestrator::run`].
#[derive(Debug)]
pub struct RunOutcome {
    pub stop: RunStop,
    /// Phase the loop was in when it stopped.
    pub phase: Phase,
    pub state: WorkflowState,
    /// `None` when the run log could not be written.
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub log_dir: PathBuf,
    pub cancel: CancelFlag,
    pub reporter: Reporter,
}

/// One scheduled agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    agent: String,
    prompt: String,
    rule_id: String,
}

enum Flow {
    Next(Step),
    Stop(RunStop),
}

impl From<Interrupted> for Flow {
    fn from(_: Interrupted) -> Self {
        Flow::Stop(RunStop::Interrupted)
    }
}

pub struct Orchestrator<'a, D, I> {
    engine: RuleEngine,
    parser: StatusParser,
    injector: PromptInjector,
    state: WorkflowState,
    agents: Vec<String>,
    timeout: Duration,
    dispatcher: &'a D,
    interaction: &'a I,
    options: RunOptions,
    phase: Phase,
}

impl<'a, D: AgentDispatcher, I: Interaction> Orchestrator<'a, D, I> {
    pub fn new(
        config: &WorkflowConfig,
        dispatcher: &'a D,
        interaction: &'a I,
        options: RunOptions,
    ) -> Result<Self, ConfigError> {
        config.protocol.validate()?;
        config.limits.validate()?;
        Ok(Self {
            engine: RuleEngine::new(config.rules.clone())?,
            parser: StatusParser::new(config.protocol.clone()),
            injector: PromptInjector::new(&config.prompt_injection, &config.protocol)?,
            state: WorkflowState::new(config.limits),
            agents: config.agents.clone(),
            timeout: Duration::from_secs(config.limits.agent_timeout_seconds),
            dispatcher,
            interaction,
            options,
            phase: Phase::Running,
        })
    }

    /// Drive the workflow for `task` until it stops.
    ///
    /// Errors are reserved for setup problems (no initial rule) and broken
    /// prompt templates; every other ending is a [`RunStop`].
    #[instrument(skip_all, fields(session_exists = session_exists))]
    pub fn run(mut self, task: &str, session_exists: bool) -> Result<RunOutcome> {
        self.options.reporter.header("WORKFLOW ORCHESTRATOR");
        if session_exists {
            self.options
                .reporter
                .info("Session state detected, checking for resume rules");
        }

        let first = self.initial_step(task, session_exists)?;
        info!(agent = %first.agent, rule_id = %first.rule_id, "workflow started");

        let mut step = first;
        let stop = loop {
            if self.options.cancel.is_raised() {
                break RunStop::Interrupted;
            }
            match self.iterate(&step)? {
                Flow::Next(next) => step = next,
                Flow::Stop(stop) => break stop,
            }
        };
        Ok(self.finish(stop))
    }

    fn initial_step(&self, task: &str, session_exists: bool) -> Result<Step> {
        let rule = self
            .engine
            .find_initial(task, session_exists)
            .ok_or(ConfigError::NoInitialRule)?;
        let Action::Transition { agent, prompt } = &rule.action else {
            return Err(anyhow!("initial rule `{}` is not a transition", rule.id));
        };
        let template = prompt.as_deref().unwrap_or(DEFAULT_CONTEXT_PROMPT);
        debug!(rule_id = %rule.id, "initial rule selected");
        Ok(Step {
            agent: agent.clone(),
            prompt: render(template, &Placeholders::for_task(task)),
            rule_id: rule.id.clone(),
        })
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "phase change");
            self.phase = phase;
        }
    }

    fn iterate(&mut self, step: &Step) -> Result<Flow> {
        self.set_phase(Phase::Running);

        if let Some(flow) = self.check_limits() {
            return Ok(flow);
        }

        let final_prompt = self
            .injector
            .inject(&step.prompt)
            .context("render protocol envelope")?;

        let reporter = self.options.reporter;
        reporter.iteration(self.state.next_iteration(), &step.agent);
        reporter.prompt(&step.prompt);

        let started = Instant::now();
        let result = self.dispatcher.run(&step.agent, &final_prompt, self.timeout);
        let duration = started.elapsed().as_secs_f64();

        let status = match result {
            Ok(output) => {
                reporter.output_preview(&output);
                self.parser.parse(&output)
            }
            Err(DispatchError::Interrupted) => {
                debug!(agent = %step.agent, "dispatch interrupted, nothing recorded");
                return Ok(Flow::Stop(RunStop::Interrupted));
            }
            Err(err) => {
                warn!(agent = %step.agent, err = %err, "dispatch failed");
                Status::dispatch_failure(err.to_string())
            }
        };
        reporter.status(&status);

        let record = self
            .state
            .record(&step.agent, &step.prompt, status, duration, &step.rule_id);
        info!(
            iteration = record.iteration,
            agent = %record.agent,
            status = %record.status.status,
            rule_id = %record.rule_id,
            "step recorded"
        );
        let status = record.status.clone();

        Ok(self.route(&step.agent, &status))
    }

    /// Ask before running past the iteration limit or into a repeated pattern.
    fn check_limits(&mut self) -> Option<Flow> {
        let mut reasons = Vec::new();
        if self.state.is_at_limit() {
            reasons.push(format!(
                "Max iterations reached ({})",
                self.state.limits().max_iterations
            ));
        }
        if self.state.is_in_loop() {
            reasons.push("Loop detected".to_string());
        }

        for reason in reasons {
            self.options.reporter.warning(&reason);
            match self.interaction.ask_continue_after_limit(&reason) {
                Ok(true) => info!(reason = %reason, "user chose to continue"),
                Ok(false) => {
                    self.state.mark_failed();
                    return Some(Flow::Stop(RunStop::Failed { reason }));
                }
                Err(interrupted) => return Some(interrupted.into()),
            }
        }
        None
    }

    fn route(&mut self, agent: &str, status: &Status) -> Flow {
        if status.is_failed() {
            if let Some(matched) = self.engine.match_failure_handler(agent, status) {
                let rule = matched.rule.clone();
                self.options.reporter.rule_match(&rule.id, &rule.description);
                return self.follow(&rule, agent, status);
            }
            self.options
                .reporter
                .error(&format!("Agent failed: {}", status.context));
            self.state.mark_failed();
            return Flow::Stop(RunStop::Failed {
                reason: format!("agent `{agent}` reported FAILED: {}", status.context),
            });
        }

        if status.is_unknown() {
            self.options
                .reporter
                .warning("Agent output had no usable status block");
            return self.fallback("no status reported; fallback declined");
        }

        let Some(matched) = self.engine.match_rule(agent, status) else {
            self.options.reporter.no_match();
            return self.fallback("no rule matched; fallback declined");
        };
        let rule = matched.rule.clone();
        self.options.reporter.rule_match(&rule.id, &rule.description);
        self.follow(&rule, agent, status)
    }

    /// Apply a matched rule's action to the status `agent` produced.
    fn follow(&mut self, rule: &Rule, agent: &str, status: &Status) -> Flow {
        let values = Placeholders {
            context: &status.context,
            status: &status.status,
            agent,
        };

        match &rule.action {
            Action::Complete { message } => {
                self.options.reporter.complete(message);
                self.state.mark_complete();
                Flow::Stop(RunStop::Complete {
                    message: message.clone(),
                })
            }
            Action::Decision {
                message,
                prompt_template,
                options,
            } => {
                self.set_phase(Phase::AwaitingUserDecision);
                let choice = match self.interaction.ask_decision(message, options) {
                    Ok(choice) => choice,
                    Err(interrupted) => return interrupted.into(),
                };
                let Some(choice) = choice else {
                    return Flow::Stop(RunStop::Inconclusive {
                        reason: format!("decision `{}` declined", rule.id),
                    });
                };
                let template = choice
                    .prompt
                    .as_deref()
                    .or(prompt_template.as_deref())
                    .unwrap_or(DEFAULT_CONTEXT_PROMPT);
                Flow::Next(Step {
                    agent: choice.agent.clone(),
                    prompt: render(template, &values),
                    rule_id: format!("{}{DECISION_SUFFIX}", rule.id),
                })
            }
            Action::Transition {
                agent: next_agent,
                prompt,
            } => {
                if let Some(retry) = &rule.retry {
                    if !self.state.can_retry(&rule.id, retry.max) {
                        let exhausted = &retry.on_exhausted;
                        self.options.reporter.error(&exhausted.message);
                        return match exhausted.kind {
                            ExhaustedAction::AskUser => {
                                self.fallback("retry budget exhausted; fallback declined")
                            }
                            ExhaustedAction::Fail => {
                                self.state.mark_failed();
                                Flow::Stop(RunStop::Failed {
                                    reason: format!(
                                        "{} (rule `{}` used {} retries)",
                                        exhausted.message, rule.id, retry.max
                                    ),
                                })
                            }
                        };
                    }
                    let used = self.state.increment_retry(&rule.id);
                    debug!(rule_id = %rule.id, used, max = retry.max, "retry consumed");
                }
                let template = prompt.as_deref().unwrap_or(DEFAULT_TRANSITION_PROMPT);
                Flow::Next(Step {
                    agent: next_agent.clone(),
                    prompt: render(template, &values),
                    rule_id: rule.id.clone(),
                })
            }
        }
    }

    /// Hand the choice of the next step to the user.
    fn fallback(&mut self, declined_reason: &str) -> Flow {
        self.set_phase(Phase::AwaitingUserFallback);
        match self.interaction.ask_fallback(&self.agents) {
            Ok(Some(choice)) => Flow::Next(Step {
                agent: choice.agent,
                prompt: choice.prompt,
                rule_id: MANUAL_RULE_ID.to_string(),
            }),
            Ok(None) => Flow::Stop(RunStop::Inconclusive {
                reason: declined_reason.to_string(),
            }),
            Err(interrupted) => interrupted.into(),
        }
    }

    fn finish(mut self, stop: RunStop) -> RunOutcome {
        let reporter = self.options.reporter;
        match &stop {
            RunStop::Complete { .. } => self.set_phase(Phase::Complete),
            RunStop::Failed { .. } => self.set_phase(Phase::Failed),
            RunStop::Inconclusive { reason } => reporter.warning(&format!("Workflow stopped: {reason}")),
            RunStop::Interrupted => {
                reporter.error("Interrupted by user");
                self.state.mark_interrupted();
                self.set_phase(Phase::Interrupted);
            }
        }

        reporter.summary(&self.state.summary());
        let log_path = match self.state.save_log(&self.options.log_dir) {
            Ok(path) => {
                reporter.log_saved(&path);
                Some(path)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write run log");
                reporter.warning(&format!("Could not save run log: {err:#}"));
                None
            }
        };

        info!(
            outcome = self.state.outcome(),
            iterations = self.state.iteration(),
            "workflow finished"
        );
        RunOutcome {
            stop,
            phase: self.phase,
            state: self.state,
            log_path,
        }
    }
}
