//! Single entry point for tracing a program
//!
//! Whatever happens to the traced program, the caller gets the same triple
//! back: whether it failed, the traceback text, and the finalized trace.

use crate::config::Config;
use crate::runner::{run_isolated, InputSource, RunnerOutcome};
use crate::trace_log::{TraceLog, DEFAULT_MAX_CHARS};
use crate::tracer::protocol::{Launch, ProbeRequest};
use crate::tracer::{ExecutionTracer, LinePlan, PROBE_SOURCE};
use crate::util::{format_seconds, tail_chars};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;
use tracing::{debug, warn};

const SOURCE_EXTENSION: &str = "py";
const STDERR_TAIL_MAX_CHARS: usize = 8_000;

/// Outcome of one traced run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub has_error: bool,
    pub traceback: String,
    pub trace: String,
}

impl RunResult {
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            has_error: true,
            traceback: format!(
                "Error: Timeout of {} seconds exceeded. Code did not exit in time. Modify code to reduce execution time.",
                format_seconds(limit)
            ),
            trace: String::new(),
        }
    }

    fn harness_failure(err: &anyhow::Error) -> Self {
        Self {
            has_error: true,
            traceback: format!("Error: tracer failed to run: {:#}", err),
            trace: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Directory module identifiers are resolved against
    pub root: PathBuf,
    pub args: Vec<String>,
    pub max_chars: usize,
    /// Print the finalized trace to stdout
    pub echo: bool,
    pub timeout: Option<Duration>,
    pub suppress_stdout: bool,
    pub input: InputSource,
    pub launch: Launch,
    pub python: String,
    /// Also write the finalized trace here
    pub destination: Option<PathBuf>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            args: Vec::new(),
            max_chars: DEFAULT_MAX_CHARS,
            echo: false,
            timeout: None,
            suppress_stdout: true,
            input: InputSource::Null,
            launch: Launch::default(),
            python: "python3".to_string(),
            destination: None,
        }
    }
}

impl TraceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chars: config.max_chars,
            timeout: config.timeout(),
            suppress_stdout: config.suppress_stdout,
            python: config.python.clone(),
            ..Self::default()
        }
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn suppress_stdout(mut self, suppress: bool) -> Self {
        self.suppress_stdout = suppress;
        self
    }

    pub fn input(mut self, input: InputSource) -> Self {
        self.input = input;
        self
    }

    pub fn launch(mut self, launch: Launch) -> Self {
        self.launch = launch;
        self
    }

    pub fn python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }
}

/// Where the traced source lives and how the child finds it.
#[derive(Debug, Clone)]
struct Target {
    module: String,
    source_path: PathBuf,
    workdir: PathBuf,
}

impl Target {
    fn basename(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Trace `module` (a dotted identifier under `options.root`).
///
/// Never fails: harness problems come back as an error result too.
pub fn trace(module: &str, options: &TraceOptions) -> RunResult {
    let result = module_target(&options.root, module)
        .and_then(|target| run_target(&target, options, options.launch.clone()));
    settle(result)
}

/// Trace a source file executed as `__main__`, the way `python3 file.py` runs it.
pub fn trace_script(script: &Path, options: &TraceOptions) -> RunResult {
    let result = script_target(script).and_then(|target| run_target(&target, options, Launch::Script));
    settle(result)
}

fn settle(result: Result<RunResult>) -> RunResult {
    result.unwrap_or_else(|err| {
        warn!("Tracer failed to run: {:#}", err);
        RunResult::harness_failure(&err)
    })
}

/// Map `pkg.mod` to `<root>/pkg/mod.py`.
pub fn module_source_path(root: &Path, module: &str) -> Result<PathBuf> {
    let segments: Vec<&str> = module.split('.').collect();
    let valid = segments.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    if !valid {
        return Err(anyhow!("Invalid module identifier '{}'", module));
    }
    let mut path = root.to_path_buf();
    path.extend(&segments);
    path.set_extension(SOURCE_EXTENSION);
    Ok(path)
}

fn module_target(root: &Path, module: &str) -> Result<Target> {
    Ok(Target {
        module: module.to_string(),
        source_path: module_source_path(root, module)?,
        workdir: root.to_path_buf(),
    })
}

fn script_target(script: &Path) -> Result<Target> {
    let source_path = script
        .canonicalize()
        .with_context(|| format!("Failed to resolve script '{}'", script.display()))?;
    let module = source_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let workdir = source_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(Target {
        module,
        source_path,
        workdir,
    })
}

fn run_target(target: &Target, options: &TraceOptions, launch: Launch) -> Result<RunResult> {
    let source = match std::fs::read_to_string(&target.source_path) {
        Ok(source) => source,
        Err(err) => {
            // The child's import error becomes the reported traceback
            warn!(
                "Failed to read '{}' for line planning: {}",
                target.source_path.display(),
                err
            );
            String::new()
        }
    };
    let plan = LinePlan::from_source(&source);
    let basename = target.basename();
    debug!(module = %target.module, planned_lines = plan.len(), "built line plan");

    let request = ProbeRequest {
        module: target.module.clone(),
        script: target.source_path.to_string_lossy().to_string(),
        basename: basename.clone(),
        launch,
        args: options.args.clone(),
        suppress_stdout: options.suppress_stdout,
        lines: plan.identifier_table(),
    };
    let mut request_file = tempfile::Builder::new()
        .prefix("exectrace-request-")
        .suffix(".json")
        .tempfile()
        .context("Failed to create probe request file")?;
    serde_json::to_writer(&mut request_file, &request).context("Failed to write probe request")?;
    request_file.flush().context("Failed to write probe request")?;

    let mut command = Command::new(&options.python);
    command
        .current_dir(&target.workdir)
        .arg("-B")
        .arg("-c")
        .arg(PROBE_SOURCE)
        .arg(request_file.path());

    let mut log = TraceLog::new(basename, options.max_chars, options.echo);
    if let Some(path) = &options.destination {
        log = log.with_destination(path);
    }
    let tracer = ExecutionTracer::new(plan, log);

    let outcome = run_isolated(
        command,
        options.input.clone(),
        options.suppress_stdout,
        options.timeout,
        tracer,
    )?;

    match outcome {
        RunnerOutcome::TimedOut => Ok(RunResult::timed_out(options.timeout.unwrap_or_default())),
        RunnerOutcome::Completed {
            status,
            tracer,
            stderr,
        } => {
            let outcome = tracer.finish();
            let (has_error, traceback) = match outcome.exit {
                Some(exit) => (exit.has_error, exit.traceback),
                None => (true, abnormal_exit_message(status, &stderr)),
            };
            Ok(RunResult {
                has_error,
                traceback,
                trace: outcome.trace,
            })
        }
    }
}

/// Traceback text for a child that died without reporting back.
fn abnormal_exit_message(status: Option<ExitStatus>, stderr: &str) -> String {
    let status = status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "an unknown status".to_string());
    let stderr = tail_chars(stderr.trim(), STDERR_TAIL_MAX_CHARS);
    if stderr.is_empty() {
        format!("Error: traced process exited with {} before reporting", status)
    } else {
        format!(
            "Error: traced process exited with {} before reporting\n{}",
            status, stderr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn workspace(files: &[(&str, &str)]) -> TempDir {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn options(dir: &TempDir) -> TraceOptions {
        TraceOptions::default()
            .root(dir.path())
            .timeout(Some(Duration::from_secs(20)))
    }

    #[test]
    fn module_identifiers_map_to_paths() {
        let path = module_source_path(Path::new("/work"), "pkg.sub.prog").unwrap();
        assert_eq!(path, PathBuf::from("/work/pkg/sub/prog.py"));
        assert!(module_source_path(Path::new("."), "../escape").is_err());
        assert!(module_source_path(Path::new("."), "pkg/prog").is_err());
        assert!(module_source_path(Path::new("."), "pkg..prog").is_err());
        assert!(module_source_path(Path::new("."), "").is_err());
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let result = RunResult::timed_out(Duration::from_secs(2));
        assert!(result.has_error);
        assert!(result.trace.is_empty());
        assert_eq!(
            result.traceback,
            "Error: Timeout of 2 seconds exceeded. Code did not exit in time. Modify code to reduce execution time."
        );
    }

    #[test]
    fn invalid_module_is_a_harness_failure() {
        let result = trace("../etc/passwd", &TraceOptions::default());
        assert!(result.has_error);
        assert!(result.traceback.starts_with("Error: tracer failed to run"));
        assert!(result.trace.is_empty());
    }

    #[test]
    fn missing_interpreter_is_a_harness_failure() {
        let dir = workspace(&[("prog.py", "def main():\n    return 1\n")]);
        let result = trace("prog", &options(&dir).python("/nonexistent/python3"));
        assert!(result.has_error);
        assert!(result.traceback.contains("Failed to start"));
    }

    #[test]
    fn abnormal_exit_includes_stderr_tail() {
        let message = abnormal_exit_message(None, "  Segmentation fault\n");
        assert!(message.contains("an unknown status"));
        assert!(message.ends_with("Segmentation fault"));
    }

    #[test]
    fn traces_assignments_before_they_run() {
        if !python_available() {
            return;
        }
        let dir = workspace(&[(
            "prog.py",
            "def main():\n    x = 5\n    y = x + 1\n    assert y == 6\n",
        )]);
        let result = trace("prog", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
        assert!(result.traceback.is_empty());
        assert_eq!(
            result.trace,
            "line   3: 'y = x + 1', variables before line executes: x=5\n\
             line   4: 'assert y == 6', variables before line executes: y=6"
        );
    }

    #[test]
    fn dotted_attributes_are_resolved() {
        if !python_available() {
            return;
        }
        let source = "\
class Holder:
    def __init__(self):
        self.value = 42

def main():
    obj = Holder()
    result = obj.value
    return result
";
        let dir = workspace(&[("prog.py", source)]);
        let result = trace("prog", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
        assert!(result
            .trace
            .contains("line   7: 'result = obj.value', variables before line executes: obj.value=42"));
        assert!(!result.trace.contains(" obj="));
    }

    #[test]
    fn loops_keep_only_the_last_iteration() {
        if !python_available() {
            return;
        }
        let source = "\
def main():
    total = 0
    for i in range(3):
        total += i
    return total
";
        let dir = workspace(&[("prog.py", source)]);
        let result = trace("prog", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
        let loop_body: Vec<&str> = result
            .trace
            .lines()
            .filter(|line| line.starts_with("line   4:"))
            .collect();
        assert_eq!(
            loop_body,
            vec!["line   4: 'total += i', variables before line executes: i=2, total=1"]
        );
        assert!(result
            .trace
            .ends_with("line   5: 'return total', variables before line executes: total=3"));
    }

    #[test]
    fn unrenderable_and_furniture_values_are_left_out() {
        if !python_available() {
            return;
        }
        let source = "\
class Loud:
    def __str__(self):
        raise RuntimeError(\"no text\")


class Box:
    def __init__(self):
        self.size = 3

    @property
    def broken(self):
        raise ValueError(\"nope\")


def main():
    import math
    n = 2.5
    r = math.floor(n)
    make = Box
    box = make()
    loud = Loud()
    a = (loud, n)
    b = box.broken if n < 0 else n
    c = box.missing if n < 0 else r
    d = box.size + r
    return d
";
        let dir = workspace(&[("edge.py", source)]);
        let result = trace("edge", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
        assert_eq!(
            result.trace,
            "line  18: 'r = math.floor(n)', variables before line executes: n=2.5\n\
             line  22: 'a = (loud, n)', variables before line executes: n=2.5\n\
             line  23: 'b = box.broken if n < 0 else n', variables before line executes: n=2.5\n\
             line  24: 'c = box.missing if n < 0 else r', variables before line executes: n=2.5, r=2\n\
             line  25: 'd = box.size + r', variables before line executes: box.size=3, r=2\n\
             line  26: 'return d', variables before line executes: d=5"
        );
    }

    #[test]
    fn undecodable_text_degrades_only_that_value() {
        if !python_available() {
            return;
        }
        let source = "def main():\n    s = \"\\ud800\"\n    n = 3\n    t = s * n\n    return n\n";
        let dir = workspace(&[("lone.py", source)]);
        let result = trace("lone", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
        assert!(result
            .trace
            .contains("line   4: 't = s * n', variables before line executes: n=3, s=\\ud800"));
    }

    #[test]
    fn large_values_arrive_elided() {
        if !python_available() {
            return;
        }
        let source = "def main():\n    big = list(range(5000))\n    count = len(big)\n    return count\n";
        let dir = workspace(&[("big.py", source)]);
        let result = trace("big", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
        assert!(result.trace.contains(
            "line   3: 'count = len(big)', variables before line executes: big=[0, 1, 2, 3, 4, 5, 6, 7, ..., 4996, 4997, 4998, 4999]"
        ));
    }

    #[test]
    fn exceptions_report_traceback_and_partial_trace() {
        if !python_available() {
            return;
        }
        let source = "\
def main(divisor):
    d = int(divisor)
    return 10 // d
";
        let dir = workspace(&[("pkg/calc.py", source)]);
        let result = trace("pkg.calc", &options(&dir).args(&["0"]));
        assert!(result.has_error);
        assert!(result.traceback.contains("ZeroDivisionError"));
        assert!(result.traceback.contains("calc.py"));
        assert!(result
            .trace
            .contains("line   2: 'd = int(divisor)', variables before line executes: divisor=0"));
    }

    #[test]
    fn runaway_programs_time_out() {
        if !python_available() {
            return;
        }
        let dir = workspace(&[("spin.py", "def main():\n    n = 0\n    while True:\n        n += 1\n")]);
        let start = Instant::now();
        let result = trace("spin", &options(&dir).timeout(Some(Duration::from_secs(1))));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(result.has_error);
        assert!(result.trace.is_empty());
        assert!(result.traceback.contains("Timeout of 1 seconds exceeded"));
    }

    #[test]
    fn clean_system_exit_is_not_an_error() {
        if !python_available() {
            return;
        }
        let dir = workspace(&[("quit.py", "import sys\n\ndef main():\n    code = 0\n    sys.exit(code)\n")]);
        let result = trace("quit", &options(&dir));
        assert!(!result.has_error, "{}", result.traceback);
    }

    #[test]
    fn scripts_read_fed_input() {
        if !python_available() {
            return;
        }
        let dir = workspace(&[(
            "solution.py",
            "n = int(input())\nprint(n * 2)\nassert n < 3\n",
        )]);
        let script = dir.path().join("solution.py");
        let result = trace_script(
            &script,
            &options(&dir).input(InputSource::Text("7\n".to_string())),
        );
        assert!(result.has_error);
        assert!(result.traceback.contains("AssertionError"));
        assert!(result
            .trace
            .contains("line   3: 'assert n < 3', variables before line executes: n=7"));
    }

    #[test]
    fn missing_module_surfaces_import_error() {
        if !python_available() {
            return;
        }
        let dir = workspace(&[]);
        let result = trace("absent", &options(&dir));
        assert!(result.has_error);
        assert!(result.traceback.contains("ModuleNotFoundError"));
    }

    #[test]
    fn destination_receives_trace() {
        if !python_available() {
            return;
        }
        let dir = workspace(&[("prog.py", "def main():\n    a = 1\n    b = a + 1\n")]);
        let out = dir.path().join("trace.txt");
        let result = trace("prog", &options(&dir).destination(&out));
        assert_eq!(fs::read_to_string(&out).unwrap(), result.trace);
        assert!(!result.trace.is_empty());
    }
}
