//! Cooperative cancellation raised by Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;

/// Shared flag polled by the dispatcher, the prompts and the loop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raise `flag` on the first Ctrl-C; exit immediately on the second.
pub fn install_ctrl_c_handler(flag: CancelFlag) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;

    thread::Builder::new()
        .name("relay-ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        warn!(err = %err, "ctrl-c listener failed");
                        return;
                    }
                    if flag.is_raised() {
                        std::process::exit(exit_codes::INTERRUPTED);
                    }
                    debug!("ctrl-c received, stopping after current step");
                    eprintln!("\nInterrupt received, stopping (press Ctrl-C again to force)");
                    flag.raise();
                }
            });
        })
        .context("spawn ctrl-c thread")?;
    Ok(())
}
