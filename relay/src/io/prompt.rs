//! Protocol injection: wraps every agent prompt with status block instructions.

use minijinja::{Environment, context};
use tracing::debug;

use crate::core::protocol::ProtocolConfig;
use crate::error::ConfigError;
use crate::io::config::PromptInjectionConfig;

const PROTOCOL_TEMPLATE: &str = include_str!("prompts/protocol.md");

/// Renders the configured envelope around prompts.
#[derive(Debug)]
pub struct PromptInjector {
    env: Environment<'static>,
    template: Option<String>,
    protocol: ProtocolConfig,
}

impl PromptInjector {
    /// Compile the envelope template and check that it renders.
    pub fn new(
        injection: &PromptInjectionConfig,
        protocol: &ProtocolConfig,
    ) -> Result<Self, ConfigError> {
        let template = injection.enabled.then(|| {
            injection
                .template
                .clone()
                .unwrap_or_else(|| PROTOCOL_TEMPLATE.to_string())
        });
        let injector = Self {
            env: Environment::new(),
            template,
            protocol: protocol.clone(),
        };
        injector
            .inject("probe")
            .map_err(|e| ConfigError::invalid("prompt_injection.template", e.to_string()))?;
        Ok(injector)
    }

    pub fn is_enabled(&self) -> bool {
        self.template.is_some()
    }

    /// Final prompt sent to the agent. Disabled injection returns `prompt` as-is.
    pub fn inject(&self, prompt: &str) -> Result<String, minijinja::Error> {
        let Some(template) = &self.template else {
            return Ok(prompt.to_string());
        };
        let rendered = self.env.render_str(template, context! {
            prompt => prompt.trim_end(),
            start_marker => &self.protocol.start_marker,
            end_marker => &self.protocol.end_marker,
            status_field => &self.protocol.status_field,
            context_field => &self.protocol.context_field,
            statuses => &self.protocol.recognized_statuses,
        })?;
        debug!(
            prompt_chars = prompt.len(),
            rendered_chars = rendered.len(),
            "prompt injected"
        );
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::StatusParser;

    #[test]
    fn default_envelope_names_markers_and_statuses() {
        let protocol = ProtocolConfig::default();
        let injector =
            PromptInjector::new(&PromptInjectionConfig::default(), &protocol).expect("injector");

        let rendered = injector.inject("Plan the cache layer").expect("render");
        assert!(rendered.starts_with("Plan the cache layer\n"));
        assert!(rendered.contains(&protocol.start_marker));
        assert!(rendered.contains(&protocol.end_marker));
        assert!(rendered.contains("READY | FAILED"));
    }

    #[test]
    fn echoed_instructions_alone_do_not_parse_as_ready() {
        let protocol = ProtocolConfig::default();
        let injector =
            PromptInjector::new(&PromptInjectionConfig::default(), &protocol).expect("injector");
        let echoed = injector.inject("task").expect("render");

        let status = StatusParser::new(protocol).parse(&echoed);
        assert!(status.is_unknown());
    }

    #[test]
    fn disabled_injection_passes_prompt_through() {
        let injection = PromptInjectionConfig {
            enabled: false,
            template: None,
        };
        let injector = PromptInjector::new(&injection, &ProtocolConfig::default()).expect("injector");
        assert!(!injector.is_enabled());
        assert_eq!(injector.inject("  raw prompt  ").expect("render"), "  raw prompt  ");
    }

    #[test]
    fn custom_template_is_used() {
        let injection = PromptInjectionConfig {
            enabled: true,
            template: Some("{{ prompt }} // end with {{ end_marker }}".to_string()),
        };
        let injector = PromptInjector::new(&injection, &ProtocolConfig::default()).expect("injector");
        assert_eq!(
            injector.inject("go").expect("render"),
            "go // end with ---END_WORKFLOW_STATUS---"
        );
    }

    #[test]
    fn broken_template_is_a_config_error() {
        let injection = PromptInjectionConfig {
            enabled: true,
            template: Some("{{ prompt ".to_string()),
        };
        let err = PromptInjector::new(&injection, &ProtocolConfig::default()).unwrap_err();
        assert!(err.to_string().contains("prompt_injection.template"));
    }
}
