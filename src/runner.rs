//! Isolated runner: one fresh interpreter process per traced run
//!
//! The line hook only ever exists inside the child. The supervisor reads
//! probe events off the child's stdout on a dedicated thread, polls for exit,
//! and kills the child outright when the time budget runs out.

use crate::tracer::protocol::ProbeEvent;
use crate::tracer::ExecutionTracer;
use crate::util::{feed_stdin, read_all, wait_with_timeout};
use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the traced program sees on stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InputSource {
    /// Reads hit end-of-file immediately.
    #[default]
    Null,
    /// Share the supervisor's stdin.
    Inherit,
    /// Fed through a pipe, then closed.
    Text(String),
}

#[derive(Debug)]
pub enum RunnerOutcome {
    /// The child exited on its own; the tracer holds everything it reported.
    Completed {
        status: Option<ExitStatus>,
        tracer: ExecutionTracer,
        stderr: String,
    },
    /// The child was killed at the deadline. Its events are discarded.
    TimedOut,
}

/// Spawn `command` and feed its probe channel into `tracer`.
///
/// Child stderr is captured when `capture_stderr` is set, otherwise it is
/// shared with the supervisor so live output stays visible.
pub fn run_isolated(
    mut command: Command,
    input: InputSource,
    capture_stderr: bool,
    timeout: Option<Duration>,
    mut tracer: ExecutionTracer,
) -> Result<RunnerOutcome> {
    let (stdin, input_text) = match input {
        InputSource::Null => (Stdio::null(), None),
        InputSource::Inherit => (Stdio::inherit(), None),
        InputSource::Text(text) => (Stdio::piped(), Some(text)),
    };
    let stderr = if capture_stderr {
        Stdio::piped()
    } else {
        Stdio::inherit()
    };

    let program = command.get_program().to_string_lossy().to_string();
    let mut child = command
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(stderr)
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;
    debug!(pid = child.id(), "started traced child");

    feed_stdin(&mut child, input_text);

    let channel = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Failed to capture the probe channel"))?;
    let reader = thread::spawn(move || {
        for line in BufReader::new(channel).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Probe channel read failed: {}", err);
                    break;
                }
            };
            match serde_json::from_str::<ProbeEvent>(&line) {
                Ok(event) => tracer.observe(event),
                Err(err) => warn!("Skipping undecodable probe message: {}", err),
            }
        }
        tracer
    });
    let stderr_reader = child
        .stderr
        .take()
        .map(|stream| thread::spawn(move || read_all(stream)));

    let (status, timed_out) = match wait_with_timeout(&mut child, timeout) {
        Ok(waited) => waited,
        Err(err) => {
            let _ = child.kill();
            return Err(anyhow!(err));
        }
    };

    if timed_out {
        // Readers are left to drain the closed pipes; nothing they hold is used.
        info!(
            pid = child.id(),
            "traced child exceeded its time budget and was killed"
        );
        return Ok(RunnerOutcome::TimedOut);
    }

    let tracer = reader
        .join()
        .map_err(|_| anyhow!("Probe channel reader panicked"))?;
    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default();
    debug!(?status, "traced child exited");

    Ok(RunnerOutcome::Completed {
        status,
        tracer,
        stderr,
    })
}
