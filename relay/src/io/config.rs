//! Workflow configuration stored under `.relay/workflow.toml` (or `.json`).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::protocol::ProtocolConfig;
use crate::core::rules::{Action, Rule, RuleEngine};
use crate::core::state::Limits;
use crate::error::ConfigError;
use crate::io::prompt::PromptInjector;

pub const RELAY_DIR: &str = ".relay";
pub const TOML_FILE: &str = "workflow.toml";
pub const JSON_FILE: &str = "workflow.json";

const WORKFLOW_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/workflow.schema.json"
));

/// Sections a config must spell out, even when every field is defaulted.
const REQUIRED_SECTIONS: [&str; 4] = ["protocol", "limits", "rules", "prompt_injection"];

/// Agents offered in the fallback menu when `agents` is not configured.
pub const DEFAULT_AGENTS: [&str; 7] = [
    "task-manager",
    "architect",
    "code-writer",
    "code-editor",
    "ui-designer",
    "code-reviewer",
    "tester",
];

/// Complete workflow configuration, loaded once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    pub protocol: ProtocolConfig,
    pub limits: Limits,
    pub rules: Vec<Rule>,
    pub prompt_injection: PromptInjectionConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<String>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptInjectionConfig {
    pub enabled: bool,
    /// minijinja template replacing the built-in protocol instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl Default for PromptInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template: None,
        }
    }
}

/// How agents are launched by the command dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Program and arguments; `{agent}` is replaced in every argument.
    pub command: Vec<String>,

    /// Agent stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: ["claude", "--print", "--agent", "{agent}"]
                .into_iter()
                .map(String::from)
                .collect(),
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Presence of this file (relative to the project dir) selects
    /// `session_resume` initial rules.
    pub state_file: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(RELAY_DIR).join("session-state.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Run logs directory, relative to the project dir.
    pub dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(RELAY_DIR).join("logs"),
            level: None,
        }
    }
}

pub fn default_agents() -> Vec<String> {
    DEFAULT_AGENTS.iter().map(|a| a.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.protocol.validate()?;
        self.limits.validate()?;
        self.runner.validate()?;
        RuleEngine::new(self.rules.clone())?;
        PromptInjector::new(&self.prompt_injection, &self.protocol)?;

        if self.agents.is_empty() {
            return Err(ConfigError::invalid("agents", "must list at least one agent"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.agents.iter().find(|a| !seen.insert(a.as_str())) {
            return Err(ConfigError::invalid("agents", format!("duplicate agent `{dup}`")));
        }
        for agent in self.referenced_agents() {
            if !self.agents.iter().any(|a| a == agent) {
                warn!(agent, "rule references an agent missing from `agents`");
            }
        }
        Ok(())
    }

    fn referenced_agents(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().flat_map(|rule| {
            let agents: Vec<&str> = match &rule.action {
                Action::Transition { agent, .. } => vec![agent.as_str()],
                Action::Decision { options, .. } => {
                    options.iter().map(|o| o.agent.as_str()).collect()
                }
                Action::Complete { .. } => Vec::new(),
            };
            agents
        })
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(ConfigError::invalid(
                "runner.command",
                "must be a non-empty array",
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(ConfigError::invalid(
                "runner.output_limit_bytes",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

/// Locate the config under `root`, preferring TOML over JSON.
///
/// Returns the TOML path when neither exists so errors name the canonical file.
pub fn find_config(root: &Path) -> PathBuf {
    let dir = root.join(RELAY_DIR);
    let toml_path = dir.join(TOML_FILE);
    let json_path = dir.join(JSON_FILE);
    if !toml_path.exists() && json_path.exists() {
        json_path
    } else {
        toml_path
    }
}

/// Read, schema-check and validate a workflow config.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_config(path: &Path) -> Result<WorkflowConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.display().to_string(),
        });
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let cfg = parse_config(&raw, ConfigFormat::from_path(path), &path.display().to_string())?;
    debug!(rules = cfg.rules.len(), "workflow config loaded");
    Ok(cfg)
}

/// Parse config text. `origin` names the source in error messages.
pub fn parse_config(
    raw: &str,
    format: ConfigFormat,
    origin: &str,
) -> Result<WorkflowConfig, ConfigError> {
    let parse_err = |reason: String| ConfigError::Parse {
        path: origin.to_string(),
        reason,
    };
    let mut value: Value = match format {
        ConfigFormat::Toml => toml::from_str(raw).map_err(|e| parse_err(e.to_string()))?,
        ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string()))?,
    };

    if let Some(inner) = value.get_mut("workflow")
        && inner.is_object()
    {
        value = inner.take();
    }
    let Some(root) = value.as_object() else {
        return Err(parse_err("top level must be a table".to_string()));
    };
    for section in REQUIRED_SECTIONS {
        if !root.contains_key(section) {
            return Err(ConfigError::MissingSection(section));
        }
    }

    let errors = schema_errors(&value)?;
    if !errors.is_empty() {
        return Err(ConfigError::Schema(errors));
    }

    let cfg: WorkflowConfig =
        serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn schema_errors(instance: &Value) -> Result<Vec<String>, ConfigError> {
    let schema: Value = serde_json::from_str(WORKFLOW_SCHEMA)
        .map_err(|e| ConfigError::invalid("bundled schema", e.to_string()))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|e| ConfigError::invalid("bundled schema", e.to_string()))?;
    Ok(compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect())
}
