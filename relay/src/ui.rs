//! Console progress output for `relay run`.

use colored::Colorize;

use crate::core::types::{FAILED, READY, Status, UNKNOWN};

/// Characters of agent output echoed in verbose mode.
const PREVIEW_CHARS: usize = 500;
/// Characters of a prompt echoed in verbose mode.
const PROMPT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    pub verbose: bool,
    pub mock: bool,
}

impl Reporter {
    pub fn new(verbose: bool, mock: bool) -> Self {
        Self { verbose, mock }
    }

    pub fn header(&self, title: &str) {
        let mode = if self.mock { "MOCK MODE" } else { "LIVE MODE" };
        let line = "=".repeat(60);
        println!("{}", line.bold());
        println!("{} {}", title.bold(), format!("({mode})").dimmed());
        println!("{}", line.bold());
    }

    pub fn iteration(&self, iteration: u32, agent: &str) {
        let tag = if self.mock { " [mock]" } else { "" };
        println!();
        println!(
            "{} {}{}",
            format!("[{iteration}]").cyan().bold(),
            agent.bold(),
            tag.dimmed()
        );
    }

    pub fn prompt(&self, prompt: &str) {
        if self.verbose {
            println!("  {} {}", "prompt:".dimmed(), preview(prompt, PROMPT_PREVIEW_CHARS));
        }
    }

    pub fn output_preview(&self, output: &str) {
        if self.verbose {
            println!("  {}", "output:".dimmed());
            for line in preview(output, PREVIEW_CHARS).lines() {
                println!("    {}", line.dimmed());
            }
        }
    }

    pub fn status(&self, status: &Status) {
        let label = match status.status.as_str() {
            READY => status.status.green().bold(),
            FAILED => status.status.red().bold(),
            UNKNOWN => status.status.yellow().bold(),
            _ => status.status.blue().bold(),
        };
        println!("  {} {} {}", "status:".dimmed(), label, format!("({})", status.source).dimmed());
        if !status.context.is_empty() {
            println!("  {} {}", "context:".dimmed(), preview(&status.context, PREVIEW_CHARS));
        }
    }

    pub fn rule_match(&self, rule_id: &str, description: &str) {
        if description.is_empty() {
            println!("  {} {}", "→".cyan(), rule_id);
        } else {
            println!("  {} {} {}", "→".cyan(), rule_id, format!("- {description}").dimmed());
        }
    }

    pub fn no_match(&self) {
        self.warning("No rule matched this status");
    }

    pub fn complete(&self, message: &str) {
        println!();
        println!("{} {}", "✓".green(), message.green().bold());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", "ℹ".blue(), message);
    }

    pub fn summary(&self, summary: &str) {
        println!();
        print!("{summary}");
    }

    pub fn log_saved(&self, path: &std::path::Path) {
        println!("  Log saved to: {}", path.display());
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
