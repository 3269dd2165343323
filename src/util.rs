use std::io::{BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is polled for exit.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Keep at most the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect::<String>()
}

/// Format a limit the way it was configured: `2`, not `2.0`.
pub fn format_seconds(limit: Duration) -> String {
    format!("{}", limit.as_secs_f64())
}

/// Write `input` to the child's stdin on a separate thread, then close it.
pub fn feed_stdin(child: &mut Child, input: Option<String>) {
    let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) else {
        return;
    };
    thread::spawn(move || {
        // A child that exits without reading its input closes the pipe early
        let _ = stdin.write_all(input.as_bytes());
    });
}

/// Poll `child` until it exits or `timeout` elapses; kills it on expiry.
///
/// Returns the exit status (None if it could not be collected after a kill)
/// and whether the timeout fired.
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<(Option<ExitStatus>, bool), String> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((Some(status), false)),
            Ok(None) => {
                if timeout.is_some_and(|limit| start.elapsed() >= limit) {
                    let _ = child.kill();
                    return match child.wait() {
                        Ok(status) => Ok((Some(status), true)),
                        Err(_) => Ok((None, true)),
                    };
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(format!("Failed to wait for command: {}", e)),
        }
    }
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Run `command` to completion with optional stdin text, capturing both streams.
pub fn run_command_with_timeout(
    command: &mut Command,
    input: Option<String>,
    timeout: Duration,
) -> Result<CommandRunResult, String> {
    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    let mut child = command
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;

    feed_stdin(&mut child, input);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;

    let stdout_handle = thread::spawn(move || read_all(stdout));
    let stderr_handle = thread::spawn(move || read_all(stderr));

    let (status, timed_out) = wait_with_timeout(&mut child, Some(timeout))?;

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default level.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // A subscriber installed earlier (tests, embedding callers) wins
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn read_all(stream: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut reader = BufReader::new(stream);
    let _ = reader.read_to_end(&mut buf);
    buf
}
