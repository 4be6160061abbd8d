//! User interaction port.
//!
//! The loop suspends on these calls when it cannot decide on its own. Every
//! method returns `Err(Interrupted)` when the user cancelled the run, and a
//! declining value (`false`, `None`) when the user chose to stop.

use std::io::{self, IsTerminal};

use dialoguer::{Confirm, Input, Select};
use tracing::{debug, warn};

use crate::core::rules::DecisionOption;
use crate::error::Interrupted;
use crate::interrupt::CancelFlag;

/// Next step chosen manually by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fallback {
    pub agent: String,
    pub prompt: String,
}

pub trait Interaction {
    /// Continue past the iteration limit or a detected loop?
    fn ask_continue_after_limit(&self, reason: &str) -> Result<bool, Interrupted>;

    /// Pick the next agent and prompt by hand, or stop.
    fn ask_fallback(&self, agents: &[String]) -> Result<Option<Fallback>, Interrupted>;

    /// Pick one of a decision rule's options, or stop.
    fn ask_decision<'a>(
        &self,
        message: &str,
        options: &'a [DecisionOption],
    ) -> Result<Option<&'a DecisionOption>, Interrupted>;
}

/// Terminal prompts built on `dialoguer`.
///
/// Without an interactive stdin every question is declined, so unattended
/// runs stop instead of hanging.
#[derive(Debug, Clone)]
pub struct ConsoleInteraction {
    cancel: CancelFlag,
    interactive: bool,
}

impl ConsoleInteraction {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            interactive: io::stdin().is_terminal(),
        }
    }

    fn check_cancel(&self) -> Result<(), Interrupted> {
        if self.cancel.is_raised() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Common tail of every prompt: cancellation wins over the answer, and a
    /// prompt error is treated as declining.
    ///
    /// Ctrl-C inside a prompt puts the terminal in raw mode, so it arrives as
    /// an `Interrupted` read error rather than a signal.
    fn settle<T>(
        &self,
        question: &str,
        answer: dialoguer::Result<Option<T>>,
    ) -> Result<Option<T>, Interrupted> {
        self.check_cancel()?;
        match answer {
            Ok(value) => Ok(value),
            Err(dialoguer::Error::IO(err)) if err.kind() == io::ErrorKind::Interrupted => {
                debug!(question, "prompt interrupted by user");
                self.cancel.raise();
                Err(Interrupted)
            }
            Err(err) => {
                warn!(question, err = %err, "prompt failed, treating as decline");
                Ok(None)
            }
        }
    }

    fn non_interactive(&self, question: &str) -> bool {
        if !self.interactive {
            warn!(question, "stdin is not a terminal, declining");
        }
        !self.interactive
    }
}

impl Interaction for ConsoleInteraction {
    fn ask_continue_after_limit(&self, reason: &str) -> Result<bool, Interrupted> {
        self.check_cancel()?;
        if self.non_interactive("continue") {
            return Ok(false);
        }
        let answer = Confirm::new()
            .with_prompt(format!("{reason}. Continue anyway?"))
            .default(false)
            .interact_opt();
        Ok(self.settle("continue", answer)?.unwrap_or(false))
    }

    fn ask_fallback(&self, agents: &[String]) -> Result<Option<Fallback>, Interrupted> {
        self.check_cancel()?;
        if agents.is_empty() || self.non_interactive("fallback") {
            return Ok(None);
        }

        let mut items: Vec<&str> = agents.iter().map(String::as_str).collect();
        items.push("Stop workflow");
        let picked = Select::new()
            .with_prompt("No rule applies. Choose the next agent")
            .items(&items)
            .default(0)
            .interact_opt();
        let Some(index) = self.settle("fallback agent", picked)? else {
            return Ok(None);
        };
        let Some(agent) = agents.get(index) else {
            debug!("user stopped the workflow from the fallback menu");
            return Ok(None);
        };

        let prompt = Input::<String>::new()
            .with_prompt(format!("Prompt for {agent}"))
            .allow_empty(true)
            .interact_text()
            .map(Some);
        let Some(prompt) = self.settle("fallback prompt", prompt)? else {
            return Ok(None);
        };
        let prompt = match prompt.trim() {
            "" => "Continue workflow".to_string(),
            text => text.to_string(),
        };

        Ok(Some(Fallback {
            agent: agent.clone(),
            prompt,
        }))
    }

    fn ask_decision<'a>(
        &self,
        message: &str,
        options: &'a [DecisionOption],
    ) -> Result<Option<&'a DecisionOption>, Interrupted> {
        self.check_cancel()?;
        if options.is_empty() || self.non_interactive("decision") {
            return Ok(None);
        }

        let mut items: Vec<String> = options
            .iter()
            .map(|o| format!("{} ({})", o.label, o.agent))
            .collect();
        items.push("Stop workflow".to_string());
        let picked = Select::new()
            .with_prompt(message)
            .items(&items)
            .default(0)
            .interact_opt();
        Ok(self
            .settle("decision", picked)?
            .and_then(|index| options.get(index)))
    }
}
