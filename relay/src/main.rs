//! Rule-driven multi-agent workflow runner.
//!
//! Reads `.relay/workflow.toml` (or `.json`), dispatches agents one at a time
//! and follows the configured rules until the workflow completes.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Input;

use relay::exit_codes;
use relay::interrupt::{CancelFlag, install_ctrl_c_handler};
use relay::io::config::{find_config, load_config};
use relay::io::init::{InitOptions, init_relay};
use relay::io::interaction::ConsoleInteraction;
use relay::logging;
use relay::run::{RunRequest, resolve_project_dir, run_workflow};
use relay::validate::validate_config;

const VERBOSE_FILTER: &str = "relay=debug";

#[derive(Parser)]
#[command(
    name = "relay",
    version,
    about = "Rule-driven orchestration of multi-agent workflows"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workflow for a task.
    Run {
        /// Task description. Asked for interactively when omitted.
        prompt: Option<String>,
        /// Use canned agent output instead of invoking agents.
        #[arg(long)]
        mock: bool,
        /// Show prompts and agent output previews.
        #[arg(short, long)]
        verbose: bool,
        /// Workflow config path (defaults to `.relay/workflow.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project directory agents run in.
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
    /// Create `.relay/workflow.toml` with the default workflow.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
    /// Check a workflow config against the schema and rule invariants.
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {:#}", "✗".red(), err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("read current directory")?;
    match cli.command {
        Command::Run {
            prompt,
            mock,
            verbose,
            config,
            project_dir,
        } => {
            let project_dir = resolve_project_dir(project_dir.as_deref(), &cwd);
            cmd_run(prompt, mock, verbose, config.as_deref(), project_dir)
        }
        Command::Init { force, project_dir } => {
            let project_dir = project_dir.unwrap_or(cwd);
            cmd_init(&project_dir, force)
        }
        Command::Validate {
            config,
            project_dir,
        } => {
            let project_dir = resolve_project_dir(project_dir.as_deref(), &cwd);
            cmd_validate(config.as_deref(), &project_dir)
        }
    }
}

fn cmd_run(
    prompt: Option<String>,
    mock: bool,
    verbose: bool,
    config_path: Option<&Path>,
    project_dir: PathBuf,
) -> Result<i32> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| find_config(&project_dir));
    let config = load_config(&config_path)?;

    let filter = if verbose {
        Some(VERBOSE_FILTER)
    } else {
        config.logging.level.as_deref()
    };
    logging::init(filter);

    let prompt = match prompt {
        Some(prompt) => prompt,
        None => read_prompt()?,
    };
    if prompt.trim().is_empty() {
        bail!("task prompt is empty");
    }

    let cancel = CancelFlag::new();
    install_ctrl_c_handler(cancel.clone())?;
    let interaction = ConsoleInteraction::new(cancel.clone());
    let request = RunRequest {
        project_dir,
        prompt,
        mock,
        verbose,
    };

    let outcome = run_workflow(&request, &config, &interaction, cancel)?;
    Ok(outcome.stop.exit_code())
}

fn read_prompt() -> Result<String> {
    if !std::io::stdin().is_terminal() {
        bail!("no task prompt given (pass it as an argument)");
    }
    Input::<String>::new()
        .with_prompt("Task")
        .interact_text()
        .context("read task prompt")
}

fn cmd_init(project_dir: &Path, force: bool) -> Result<i32> {
    logging::init(None);
    let paths = init_relay(project_dir, &InitOptions { force })?;
    println!("{} Created {}", "✓".green(), paths.config_path.display());
    println!("  Edit the rules, then run: relay run \"<task>\"");
    Ok(exit_codes::OK)
}

fn cmd_validate(config_path: Option<&Path>, project_dir: &Path) -> Result<i32> {
    logging::init(None);
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| find_config(project_dir));
    let outcome = validate_config(&config_path)?;
    println!("{} {} is valid", "✓".green(), config_path.display());
    println!(
        "  {} rules ({} initial, {} terminal), {} agents",
        outcome.rules, outcome.initial_rules, outcome.terminal_rules, outcome.agents
    );
    Ok(exit_codes::OK)
}
