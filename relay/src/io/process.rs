//! Running agent commands with a timeout, bounded output and cancellation.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::interrupt::CancelFlag;

/// Granularity at which a running child is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandLimits<'a> {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub cancel: Option<&'a CancelFlag>,
}

/// Run `cmd`, feeding `stdin`, until it exits, times out or is cancelled.
///
/// stdout and stderr are drained on their own threads so a chatty child can
/// never block on a full pipe. Bytes past `output_limit_bytes` are counted and
/// discarded.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: CommandLimits<'_>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Writer runs detached so a child that never reads cannot outlive the timeout.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                debug!(err = %e, "child closed stdin early");
            }
        });
    }

    let (status, timed_out, interrupted) = wait_with_cancel(&mut child, limits)?;

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, interrupted, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        interrupted,
    })
}

fn wait_with_cancel(
    child: &mut Child,
    limits: CommandLimits<'_>,
) -> Result<(ExitStatus, bool, bool)> {
    let deadline = Instant::now() + limits.timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            return Ok((kill_and_wait(child)?, true, false));
        }
        let slice = POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            return Ok((status, false, false));
        }
        if limits.cancel.is_some_and(CancelFlag::is_raised) {
            warn!("command cancelled, killing");
            return Ok((kill_and_wait(child)?, false, true));
        }
    }
}

fn kill_and_wait(child: &mut Child) -> Result<ExitStatus> {
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut kept).context("read output")?;
    // Drain the rest; a full pipe would block the child.
    let dropped = io::copy(&mut limited.into_inner(), &mut io::sink()).context("drain output")?;
    Ok((kept, usize::try_from(dropped).unwrap_or(usize::MAX)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn limits(timeout: Duration) -> CommandLimits<'static> {
        CommandLimits {
            timeout,
            output_limit_bytes: 1024,
            cancel: None,
        }
    }

    #[test]
    fn captures_stdout_from_stdin() {
        let output = run_command(
            Command::new("cat"),
            Some(b"hello agent".as_slice()),
            limits(Duration::from_secs(5)),
        )
        .expect("run cat");
        assert!(output.status.success());
        assert_eq!(output.stdout_lossy(), "hello agent");
        assert!(!output.timed_out);
    }

    #[test]
    fn kills_child_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command(cmd, None, limits(Duration::from_millis(200))).expect("run");
        assert!(output.timed_out);
        assert!(!output.interrupted);
    }

    #[test]
    fn kills_child_when_cancelled() {
        let flag = CancelFlag::new();
        flag.raise();
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command(
            cmd,
            None,
            CommandLimits {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 1024,
                cancel: Some(&flag),
            },
        )
        .expect("run");
        assert!(output.interrupted);
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_output_past_limit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "head -c 2000 /dev/zero"]);
        let output = run_command(cmd, None, limits(Duration::from_secs(5))).expect("run");
        assert_eq!(output.stdout.len(), 1024);
        assert_eq!(output.stdout_truncated, 976);
    }
}
