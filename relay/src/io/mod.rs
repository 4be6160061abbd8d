//! I/O for relay commands: config, agent processes, prompts, logs, the terminal.

pub mod config;
pub mod dispatch;
pub mod init;
pub mod interaction;
pub mod process;
pub mod prompt;
pub mod run_log;
