//! Declarative rule set and first-match-wins rule engine.
//!
//! Rules are evaluated strictly in configured order. The engine performs no
//! specificity ranking: authors place narrower rules first.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{FAILED, Status};
use crate::error::ConfigError;

/// Matches any agent or any status.
pub const WILDCARD: &str = "*";

const DEFAULT_COMPLETE_MESSAGE: &str = "Workflow complete!";
const DEFAULT_DECISION_MESSAGE: &str = "Choose next action:";
const DEFAULT_EXHAUSTED_MESSAGE: &str = "Retry limit reached";

/// One configured rule. Its position in the list is its priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Marks a rule that starts a run instead of reacting to a status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<InitialKind>,
    #[serde(default, rename = "match")]
    pub matcher: RuleMatcher,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialKind {
    /// Generic entry point of a run.
    Start,
    /// Entry point preferred when a previous session left state behind.
    SessionResume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatcher {
    #[serde(default = "wildcard")]
    pub agent: String,
    #[serde(default = "wildcard")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_pattern: Option<String>,
}

impl Default for RuleMatcher {
    fn default() -> Self {
        Self {
            agent: wildcard(),
            status: wildcard(),
            context_pattern: None,
        }
    }
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

/// What happens once a rule matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Transition {
        agent: String,
        /// Prompt template; see [`crate::core::template`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    Complete {
        #[serde(default = "default_complete_message")]
        message: String,
    },
    Decision {
        #[serde(default = "default_decision_message")]
        message: String,
        /// Template used by options that do not carry their own prompt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_template: Option<String>,
        options: Vec<DecisionOption>,
    },
}

fn default_complete_message() -> String {
    DEFAULT_COMPLETE_MESSAGE.to_string()
}

fn default_decision_message() -> String {
    DEFAULT_DECISION_MESSAGE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub label: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    #[serde(default)]
    pub on_exhausted: OnExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnExhausted {
    #[serde(rename = "type", default)]
    pub kind: ExhaustedAction,
    #[serde(default = "default_exhausted_message")]
    pub message: String,
}

impl Default for OnExhausted {
    fn default() -> Self {
        Self {
            kind: ExhaustedAction::default(),
            message: default_exhausted_message(),
        }
    }
}

fn default_exhausted_message() -> String {
    DEFAULT_EXHAUSTED_MESSAGE.to_string()
}

/// Policy once a rule's retry budget is spent. Unrecognized values mean `Fail`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    AskUser,
    #[default]
    #[serde(other)]
    Fail,
}

/// A rule selected by [`RuleEngine::match_rule`].
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    pub rule: &'a Rule,
    pub position: usize,
}

impl<'a> RuleMatch<'a> {
    pub fn rule_id(&self) -> &'a str {
        &self.rule.id
    }

    pub fn action(&self) -> &'a Action {
        &self.rule.action
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: Rule,
    pattern: Option<Regex>,
}

impl CompiledRule {
    fn context_matches(&self, context: &str) -> bool {
        self.pattern.as_ref().is_none_or(|re| re.is_match(context))
    }

    fn agent_matches(&self, agent: &str) -> bool {
        let expected = &self.rule.matcher.agent;
        expected == WILDCARD || expected == agent
    }

    fn status_matches(&self, status: &str) -> bool {
        let expected = &self.rule.matcher.status;
        expected == WILDCARD || expected == status
    }
}

/// Immutable, ordered rule set.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Compile and validate `rules`, preserving their order.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::NoRules);
        }

        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.id.trim().is_empty() {
                return Err(ConfigError::rule(&rule.id, "id must be non-empty"));
            }
            if !seen.insert(rule.id.clone()) {
                return Err(ConfigError::DuplicateRule(rule.id));
            }
            validate_rule(&rule)?;
            let pattern = match &rule.matcher.context_pattern {
                Some(raw) => Some(Regex::new(raw).map_err(|err| {
                    ConfigError::rule(&rule.id, format!("invalid context_pattern: {err}"))
                })?),
                None => None,
            };
            compiled.push(CompiledRule { rule, pattern });
        }

        if !compiled
            .iter()
            .any(|c| c.rule.initial == Some(InitialKind::Start))
        {
            return Err(ConfigError::NoInitialRule);
        }

        Ok(Self { rules: compiled })
    }

    /// Pick the rule that starts a run.
    ///
    /// With `session_exists`, a matching `session_resume` rule takes precedence
    /// over the generic `start` rule. Patterns on initial rules are matched
    /// against `context` (the user's task description).
    pub fn find_initial(&self, context: &str, session_exists: bool) -> Option<&Rule> {
        let find = |kind: InitialKind| {
            self.rules
                .iter()
                .find(|c| c.rule.initial == Some(kind) && c.context_matches(context))
                .map(|c| &c.rule)
        };

        if session_exists && let Some(rule) = find(InitialKind::SessionResume) {
            debug!(rule_id = %rule.id, "session resume rule selected");
            return Some(rule);
        }
        find(InitialKind::Start)
    }

    /// First rule matching `agent` and `status`, in configured order.
    pub fn match_rule(&self, agent: &str, status: &Status) -> Option<RuleMatch<'_>> {
        self.first_match(|c| {
            c.agent_matches(agent)
                && c.status_matches(&status.status)
                && c.context_matches(&status.context)
        })
    }

    /// First retry-bearing rule that names `FAILED` explicitly for `agent`.
    ///
    /// A FAILED status is terminal unless such a rule opts into handling it.
    pub fn match_failure_handler(&self, agent: &str, status: &Status) -> Option<RuleMatch<'_>> {
        self.first_match(|c| {
            c.rule.retry.is_some()
                && c.rule.matcher.status == FAILED
                && c.agent_matches(agent)
                && c.context_matches(&status.context)
        })
    }

    fn first_match<F: Fn(&CompiledRule) -> bool>(&self, predicate: F) -> Option<RuleMatch<'_>> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, c)| c.rule.initial.is_none())
            .find(|(_, c)| predicate(c))
            .map(|(position, c)| RuleMatch {
                rule: &c.rule,
                position,
            })
    }
}

fn validate_rule(rule: &Rule) -> Result<(), ConfigError> {
    if rule.initial.is_some() && !matches!(rule.action, Action::Transition { .. }) {
        return Err(ConfigError::rule(
            &rule.id,
            "initial rules must use a transition action",
        ));
    }
    match &rule.action {
        Action::Transition { agent, .. } if agent.trim().is_empty() => {
            return Err(ConfigError::rule(&rule.id, "transition agent is empty"));
        }
        Action::Decision { options, .. } => {
            if options.is_empty() {
                return Err(ConfigError::rule(&rule.id, "decision has no options"));
            }
            if let Some(option) = options.iter().find(|o| o.agent.trim().is_empty()) {
                return Err(ConfigError::rule(
                    &rule.id,
                    format!("decision option `{}` has no agent", option.label),
                ));
            }
        }
        _ => {}
    }
    if let Some(retry) = &rule.retry {
        if retry.max == 0 {
            return Err(ConfigError::rule(&rule.id, "retry.max must be > 0"));
        }
        if !matches!(rule.action, Action::Transition { .. }) {
            return Err(ConfigError::rule(
                &rule.id,
                "retry is only supported on transition actions",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{complete_rule, start_rule, transition_rule, with_retry};

    fn ready(context: &str) -> Status {
        Status::new("READY", context, "protocol")
    }

    #[test]
    fn first_match_wins_in_configured_order() {
        let engine = RuleEngine::new(vec![
            start_rule("start", "task-manager"),
            transition_rule("r1", "task-manager", "READY", "architect", "a"),
            transition_rule("r2", "task-manager", "READY", "tester", "b"),
            transition_rule("r3", "*", "*", "code-writer", "c"),
        ])
        .expect("engine");

        let matched = engine.match_rule("task-manager", &ready("ok")).expect("match");
        assert_eq!(matched.rule_id(), "r1");
        assert_eq!(matched.position, 1);
    }

    #[test]
    fn wildcard_rule_placed_first_shadows_specific_rules() {
        let engine = RuleEngine::new(vec![
            start_rule("start", "task-manager"),
            transition_rule("any", "*", "*", "tester", "t"),
            transition_rule("specific", "task-manager", "READY", "architect", "a"),
        ])
        .expect("engine");

        let matched = engine.match_rule("task-manager", &ready("ok")).expect("match");
        assert_eq!(matched.rule_id(), "any");
    }

    #[test]
    fn context_pattern_narrows_match() {
        let mut ui_rule = transition_rule("ui", "architect", "READY", "ui-designer", "{context}");
        ui_rule.matcher.context_pattern = Some("(?i)dialog|panel".to_string());
        let engine = RuleEngine::new(vec![
            start_rule("start", "task-manager"),
            ui_rule,
            transition_rule("code", "architect", "READY", "code-writer", "{context}"),
        ])
        .expect("engine");

        let ui = engine
            .match_rule("architect", &ready("new settings Dialog"))
            .expect("match");
        assert_eq!(ui.rule_id(), "ui");
        let code = engine
            .match_rule("architect", &ready("parser refactor"))
            .expect("match");
        assert_eq!(code.rule_id(), "code");
    }

    #[test]
    fn no_match_returns_none() {
        let engine = RuleEngine::new(vec![
            start_rule("start", "task-manager"),
            complete_rule("done", "tester", "READY"),
        ])
        .expect("engine");
        assert!(engine.match_rule("architect", &ready("ok")).is_none());
    }

    #[test]
    fn initial_rules_never_match_statuses() {
        let engine = RuleEngine::new(vec![start_rule("start", "task-manager")]).expect("engine");
        assert!(engine.match_rule("task-manager", &ready("ok")).is_none());
    }

    #[test]
    fn find_initial_prefers_session_resume_only_with_session() {
        let mut resume = start_rule("resume", "task-manager");
        resume.initial = Some(InitialKind::SessionResume);
        let engine =
            RuleEngine::new(vec![resume, start_rule("start", "task-manager")]).expect("engine");

        assert_eq!(engine.find_initial("task", true).expect("initial").id, "resume");
        assert_eq!(engine.find_initial("task", false).expect("initial").id, "start");
    }

    #[test]
    fn find_initial_uses_context_pattern() {
        let mut design = start_rule("design-first", "architect");
        design.matcher.context_pattern = Some("(?i)^design".to_string());
        let engine =
            RuleEngine::new(vec![design, start_rule("start", "task-manager")]).expect("engine");

        assert_eq!(
            engine.find_initial("Design the cache", false).expect("initial").id,
            "design-first"
        );
        assert_eq!(
            engine.find_initial("new task: cache", false).expect("initial").id,
            "start"
        );
    }

    #[test]
    fn find_initial_returns_none_when_no_pattern_matches() {
        let mut only = start_rule("start", "task-manager");
        only.matcher.context_pattern = Some("^never$".to_string());
        let engine = RuleEngine::new(vec![only]).expect("engine");
        assert!(engine.find_initial("anything", false).is_none());
    }

    #[test]
    fn failure_handler_requires_explicit_failed_and_retry() {
        let wildcard_retry = with_retry(
            transition_rule("any", "tester", "*", "code-editor", "fix"),
            2,
            ExhaustedAction::Fail,
        );
        let explicit_no_retry = transition_rule("plain", "tester", "FAILED", "code-editor", "fix");
        let explicit_retry = with_retry(
            transition_rule("retry", "tester", "FAILED", "code-editor", "fix {context}"),
            2,
            ExhaustedAction::AskUser,
        );
        let engine = RuleEngine::new(vec![
            start_rule("start", "task-manager"),
            wildcard_retry,
            explicit_no_retry,
            explicit_retry,
        ])
        .expect("engine");

        let failed = Status::new("FAILED", "tests broke", "protocol");
        let handler = engine
            .match_failure_handler("tester", &failed)
            .expect("handler");
        assert_eq!(handler.rule_id(), "retry");
        assert!(engine.match_failure_handler("architect", &failed).is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = RuleEngine::new(vec![
            start_rule("start", "task-manager"),
            start_rule("start", "architect"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRule(id) if id == "start"));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let mut bad = transition_rule("bad", "*", "*", "tester", "x");
        bad.matcher.context_pattern = Some("(".to_string());
        let err = RuleEngine::new(vec![start_rule("start", "task-manager"), bad]).unwrap_err();
        assert!(err.to_string().contains("invalid context_pattern"));
    }

    #[test]
    fn requires_a_start_rule() {
        let err = RuleEngine::new(vec![complete_rule("done", "tester", "READY")]).unwrap_err();
        assert!(matches!(err, ConfigError::NoInitialRule));
    }

    #[test]
    fn rejects_empty_rule_set() {
        assert!(matches!(
            RuleEngine::new(Vec::new()).unwrap_err(),
            ConfigError::NoRules
        ));
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let rule = with_retry(
            transition_rule("r", "tester", "READY", "tester", "again"),
            0,
            ExhaustedAction::Fail,
        );
        let err = RuleEngine::new(vec![start_rule("start", "task-manager"), rule]).unwrap_err();
        assert!(err.to_string().contains("retry.max"));
    }

    #[test]
    fn unknown_exhausted_type_deserializes_as_fail() {
        let policy: OnExhausted =
            serde_json::from_str(r#"{"type": "explode", "message": "x"}"#).expect("parse");
        assert_eq!(policy.kind, ExhaustedAction::Fail);
        let ask: OnExhausted = serde_json::from_str(r#"{"type": "ask_user"}"#).expect("parse");
        assert_eq!(ask.kind, ExhaustedAction::AskUser);
        assert_eq!(ask.message, "Retry limit reached");
    }

    #[test]
    fn action_is_tagged_by_type() {
        let action: Action = serde_json::from_str(
            r#"{"type": "decision", "message": "pick", "options": [{"label": "Fix", "agent": "code-editor"}]}"#,
        )
        .expect("parse");
        let Action::Decision { options, prompt_template, .. } = action else {
            panic!("expected decision");
        };
        assert_eq!(options[0].agent, "code-editor");
        assert!(prompt_template.is_none());
    }
}
