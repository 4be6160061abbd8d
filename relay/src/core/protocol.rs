//! Status protocol parsing.
//!
//! Agents end their reply with a delimited block of `key: value` lines:
//!
//! ```text
//! ---WORKFLOW_STATUS---
//! status: READY
//! context: schema drafted in docs/design.md
//! ---END_WORKFLOW_STATUS---
//! ```
//!
//! Markers, field names and the accepted status values all come from
//! [`ProtocolConfig`]. Parsing never fails: anything unusable degrades to an
//! `UNKNOWN` status so the run can escalate to the user instead of aborting.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{FAILED, READY, SOURCE_PROTOCOL, Status, UNKNOWN};
use crate::error::ConfigError;

/// Wire format of the status block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub start_marker: String,
    pub end_marker: String,
    pub status_field: String,
    pub context_field: String,
    pub source_field: String,
    /// Accepted status values. Must include `READY` and `FAILED`.
    pub recognized_statuses: Vec<String>,
    /// Maximum characters of raw output kept as context when parsing degrades.
    pub fallback_context_chars: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            start_marker: "---WORKFLOW_STATUS---".to_string(),
            end_marker: "---END_WORKFLOW_STATUS---".to_string(),
            status_field: "status".to_string(),
            context_field: "context".to_string(),
            source_field: "source".to_string(),
            recognized_statuses: vec![READY.to_string(), FAILED.to_string()],
            fallback_context_chars: 500,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_marker.trim().is_empty() || self.end_marker.trim().is_empty() {
            return Err(ConfigError::invalid(
                "protocol markers",
                "start_marker and end_marker must be non-empty",
            ));
        }
        if self.start_marker == self.end_marker {
            return Err(ConfigError::invalid(
                "protocol markers",
                "start_marker and end_marker must differ",
            ));
        }
        let fields = [&self.status_field, &self.context_field, &self.source_field];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "protocol fields",
                "field names must be non-empty",
            ));
        }
        for (i, a) in fields.iter().enumerate() {
            if fields[i + 1..].iter().any(|b| a.eq_ignore_ascii_case(b)) {
                return Err(ConfigError::invalid(
                    "protocol fields",
                    format!("field name `{a}` is used twice"),
                ));
            }
        }
        for required in [READY, FAILED] {
            if !self.recognized_statuses.iter().any(|s| s == required) {
                return Err(ConfigError::invalid(
                    "protocol.recognized_statuses",
                    format!("must include {required} spelled exactly"),
                ));
            }
        }
        let statuses = &self.recognized_statuses;
        for (i, a) in statuses.iter().enumerate() {
            if statuses[i + 1..].iter().any(|b| a.eq_ignore_ascii_case(b)) {
                return Err(ConfigError::invalid(
                    "protocol.recognized_statuses",
                    format!("status `{a}` is listed twice"),
                ));
            }
        }
        if self.recognizes(UNKNOWN) {
            return Err(ConfigError::invalid(
                "protocol.recognized_statuses",
                format!("{UNKNOWN} is reserved"),
            ));
        }
        if self.fallback_context_chars == 0 {
            return Err(ConfigError::invalid(
                "protocol.fallback_context_chars",
                "must be > 0",
            ));
        }
        Ok(())
    }

    fn recognizes(&self, status: &str) -> bool {
        self.recognized_statuses
            .iter()
            .any(|s| s.eq_ignore_ascii_case(status))
    }
}

/// Extracts [`Status`] records from raw agent output.
#[derive(Debug, Clone)]
pub struct StatusParser {
    config: ProtocolConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Status,
    Context,
    Source,
}

#[derive(Debug, Default)]
struct BlockFields {
    status: Option<String>,
    context: Option<String>,
    source: Option<String>,
}

impl BlockFields {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Status => &mut self.status,
            Field::Context => &mut self.context,
            Field::Source => &mut self.source,
        }
    }
}

impl StatusParser {
    pub fn new(config: ProtocolConfig) -> Self {
        Self { config }
    }

    /// Parse the last complete status block in `raw_output`.
    pub fn parse(&self, raw_output: &str) -> Status {
        let Some(body) = self.last_block(raw_output) else {
            warn!("no status block in agent output");
            return Status::unknown(self.tail(raw_output));
        };

        let fields = self.parse_fields(body);
        let context = fields.context.unwrap_or_default();
        let recognized = fields.status.as_deref().and_then(|s| self.canonical(s));
        match recognized {
            Some(status) => {
                let source = fields
                    .source
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| SOURCE_PROTOCOL.to_string());
                debug!(status = %status, source = %source, "parsed status block");
                Status::new(status, context, source)
            }
            None => {
                warn!(status = ?fields.status, "status block has no recognized status");
                if context.is_empty() {
                    Status::unknown(self.tail(raw_output))
                } else {
                    Status::unknown(context)
                }
            }
        }
    }

    /// Body of the last block that has both markers, without the markers.
    fn last_block<'a>(&self, raw: &'a str) -> Option<&'a str> {
        let end = raw.rfind(&self.config.end_marker)?;
        let head = &raw[..end];
        let start = head.rfind(&self.config.start_marker)?;
        Some(&head[start + self.config.start_marker.len()..])
    }

    fn parse_fields(&self, body: &str) -> BlockFields {
        let mut fields = BlockFields::default();
        let mut current: Option<Field> = None;

        for line in body.lines() {
            // A key is taken once per block; a repeat belongs to the current value.
            if let Some((field, value)) = self.field_line(line)
                && fields.slot(field).is_none()
            {
                *fields.slot(field) = Some(value.to_string());
                current = Some(field);
                continue;
            }
            // Continuation lines extend the previous field verbatim.
            if let Some(field) = current
                && let Some(existing) = fields.slot(field)
            {
                existing.push('\n');
                existing.push_str(line);
            }
        }

        for field in [Field::Status, Field::Context, Field::Source] {
            if let Some(value) = fields.slot(field) {
                *value = value.trim().to_string();
            }
        }
        fields
    }

    fn field_line<'l>(&self, line: &'l str) -> Option<(Field, &'l str)> {
        let (key, value) = line.split_once(':')?;
        let key = key.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '*' | '`'));
        let field = if key.eq_ignore_ascii_case(&self.config.status_field) {
            Field::Status
        } else if key.eq_ignore_ascii_case(&self.config.context_field) {
            Field::Context
        } else if key.eq_ignore_ascii_case(&self.config.source_field) {
            Field::Source
        } else {
            return None;
        };
        Some((field, value.trim_start()))
    }

    /// Configured spelling of `raw`, if it is a recognized status.
    fn canonical(&self, raw: &str) -> Option<String> {
        let value = raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '`'));
        self.config
            .recognized_statuses
            .iter()
            .find(|s| s.eq_ignore_ascii_case(value))
            .cloned()
    }

    fn tail(&self, raw: &str) -> String {
        truncate_tail(raw.trim(), self.config.fallback_context_chars)
    }
}

/// Keep the last `max_chars` characters of `text`, marking the cut.
fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> StatusParser {
        StatusParser::new(ProtocolConfig {
            recognized_statuses: vec![
                "READY".to_string(),
                "FAILED".to_string(),
                "CHANGES_REQUESTED".to_string(),
            ],
            ..ProtocolConfig::default()
        })
    }

    fn block(body: &str) -> String {
        format!("---WORKFLOW_STATUS---\n{body}\n---END_WORKFLOW_STATUS---")
    }

    #[test]
    fn parses_block_surrounded_by_free_text() {
        let raw = format!(
            "I looked at the code.\n\n{}\n\nThanks!",
            block("status: READY\ncontext: design written to docs/x.md\nsource: architect")
        );
        let status = parser().parse(&raw);
        assert_eq!(
            status,
            Status::new("READY", "design written to docs/x.md", "architect")
        );
    }

    #[test]
    fn missing_source_defaults_to_protocol() {
        let status = parser().parse(&block("status: READY\ncontext: ok"));
        assert_eq!(status.source, "protocol");
    }

    #[test]
    fn status_is_normalized_to_configured_spelling() {
        let status = parser().parse(&block("Status: **changes_requested**\ncontext: nits"));
        assert_eq!(status.status, "CHANGES_REQUESTED");
    }

    #[test]
    fn failed_context_is_kept_verbatim_across_lines() {
        let raw = block("status: FAILED\ncontext: build broke:\n  error[E0308]: mismatched types\n  at src/lib.rs:10");
        let status = parser().parse(&raw);
        assert!(status.is_failed());
        assert_eq!(
            status.context,
            "build broke:\n  error[E0308]: mismatched types\n  at src/lib.rs:10"
        );
    }

    #[test]
    fn last_complete_block_wins() {
        let raw = format!(
            "{}\nmore work...\n{}",
            block("status: FAILED\ncontext: first"),
            block("status: READY\ncontext: second")
        );
        assert_eq!(parser().parse(&raw).context, "second");
    }

    #[test]
    fn trailing_unterminated_block_is_ignored() {
        let raw = format!(
            "{}\n---WORKFLOW_STATUS---\nstatus: FAILED",
            block("status: READY\ncontext: done")
        );
        assert_eq!(parser().parse(&raw).status, "READY");
    }

    #[test]
    fn output_without_block_degrades_to_unknown() {
        let status = parser().parse("just some prose, no status");
        assert!(status.is_unknown());
        assert_eq!(status.source, "fallback");
        assert_eq!(status.context, "just some prose, no status");
    }

    #[test]
    fn only_unterminated_block_degrades_to_unknown() {
        let status = parser().parse("---WORKFLOW_STATUS---\nstatus: READY\ncontext: ok");
        assert!(status.is_unknown());
    }

    #[test]
    fn unrecognized_status_keeps_block_context() {
        let status = parser().parse(&block("status: MAYBE\ncontext: not sure"));
        assert!(status.is_unknown());
        assert_eq!(status.context, "not sure");
    }

    #[test]
    fn missing_status_field_degrades_to_unknown() {
        let status = parser().parse(&block("context: forgot the status"));
        assert!(status.is_unknown());
    }

    #[test]
    fn fallback_context_keeps_the_tail() {
        let parser = StatusParser::new(ProtocolConfig {
            fallback_context_chars: 5,
            ..ProtocolConfig::default()
        });
        let status = parser.parse("abcdefghij");
        assert_eq!(status.context, "...fghij");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_tail("zażółć", 3), "...ółć");
    }

    #[test]
    fn custom_markers_and_fields() {
        let parser = StatusParser::new(ProtocolConfig {
            start_marker: "<status>".to_string(),
            end_marker: "</status>".to_string(),
            status_field: "state".to_string(),
            context_field: "notes".to_string(),
            ..ProtocolConfig::default()
        });
        let status = parser.parse("<status>\nstate: READY\nnotes: fine\n</status>");
        assert_eq!(status, Status::new("READY", "fine", "protocol"));
    }

    #[test]
    fn parse_is_deterministic() {
        let raw = block("status: READY\ncontext: same");
        assert_eq!(parser().parse(&raw), parser().parse(&raw));
    }

    #[test]
    fn validate_rejects_missing_failed_status() {
        let config = ProtocolConfig {
            recognized_statuses: vec!["READY".to_string()],
            ..ProtocolConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must include FAILED"));
    }

    #[test]
    fn validate_requires_exact_reserved_spelling() {
        let config = ProtocolConfig {
            recognized_statuses: vec!["READY".to_string(), "failed".to_string()],
            ..ProtocolConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = ProtocolConfig::default();
        config.recognized_statuses.push("Failed".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"), "{err}");
    }

    #[test]
    fn lowercase_failed_is_normalized_to_reserved_value() {
        let status = parser().parse(&block("status: failed\ncontext: broke"));
        assert_eq!(status.status, FAILED);
        assert!(status.is_failed());
    }

    #[test]
    fn repeated_keys_inside_context_are_continuation_lines() {
        let raw = block(
            "status: FAILED\nsource: tester\ncontext: cargo test failed:\nstatus: exit code 101\nsource: src/lib.rs:4",
        );
        let status = parser().parse(&raw);
        assert!(status.is_failed());
        assert_eq!(
            status.context,
            "cargo test failed:\nstatus: exit code 101\nsource: src/lib.rs:4"
        );
        assert_eq!(status.source, "tester");
    }

    #[test]
    fn validate_rejects_reserved_unknown() {
        let mut config = ProtocolConfig::default();
        config.recognized_statuses.push("unknown".to_string());
        assert!(config.validate().is_err());
    }
}
