//! Placeholder substitution for rule prompt templates.
//!
//! Supported placeholders are `{context}`, `{status}` and `{agent}`. Anything
//! else in braces is kept verbatim, and substituted values are never expanded
//! again.

/// Values available to a prompt template.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    pub context: &'a str,
    pub status: &'a str,
    pub agent: &'a str,
}

impl<'a> Placeholders<'a> {
    /// Placeholders for an initial prompt, where only the user's task exists.
    pub fn for_task(task: &'a str) -> Self {
        Self {
            context: task,
            status: "",
            agent: "",
        }
    }

    fn lookup(&self, name: &str) -> Option<&'a str> {
        match name {
            "context" => Some(self.context),
            "status" => Some(self.status),
            "agent" => Some(self.agent),
            _ => None,
        }
    }
}

pub fn render(template: &str, values: &Placeholders<'_>) -> String {
    let mut out = String::with_capacity(template.len() + values.context.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match values.lookup(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
