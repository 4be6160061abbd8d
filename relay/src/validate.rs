//! `relay validate`: load and check a workflow config without running it.

use std::path::Path;

use crate::core::rules::Action;
use crate::error::ConfigError;
use crate::io::config::{WorkflowConfig, load_config};

/// Summary of a config that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub rules: usize,
    pub initial_rules: usize,
    pub terminal_rules: usize,
    pub agents: usize,
}

impl ValidateOutcome {
    fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            rules: config.rules.len(),
            initial_rules: config
                .rules
                .iter()
                .filter(|r| r.initial.is_some())
                .count(),
            terminal_rules: config
                .rules
                .iter()
                .filter(|r| matches!(r.action, Action::Complete { .. }))
                .count(),
            agents: config.agents.len(),
        }
    }
}

pub fn validate_config(path: &Path) -> Result<ValidateOutcome, ConfigError> {
    let config = load_config(path)?;
    Ok(ValidateOutcome::from_config(&config))
}
