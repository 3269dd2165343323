//! Error signals for candidate programs judged against test cases
//!
//! Each candidate is syntax-checked, run once per test case, and traced again
//! whenever it crashes or answers wrongly. The collected signals are what a
//! repair loop feeds back to the code generator.

use crate::classify::syntax_issue;
use crate::config::Config;
use crate::runner::InputSource;
use crate::trace::{trace_script, RunResult, TraceOptions};
use crate::tracer::protocol::Launch;
use crate::util::{run_command_with_timeout, tail_chars, CommandRunResult};
use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const CANDIDATE_FILE: &str = "solution.py";
const STDERR_TAIL_MAX_CHARS: usize = 8_000;

/// Compiles the file named by `argv[1]` without running it and prints the
/// first syntax error, if any.
const COMPILE_CHECK: &str = r#"import sys
path = sys.argv[1]
try:
    with open(path, "rb") as handle:
        compile(handle.read(), path, "exec")
except (SyntaxError, ValueError) as exc:
    line = getattr(exc, "lineno", None) or 0
    column = getattr(exc, "offset", None) or 0
    print(f"syntax error at line {line}, column {column}: {getattr(exc, 'msg', exc)}")
"#;

/// Which group of test cases to judge against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSplit {
    #[default]
    Public,
    Private,
    Extra,
}

impl TestSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestSplit::Public => "public",
            TestSplit::Private => "private",
            TestSplit::Extra => "extra",
        }
    }
}

impl FromStr for TestSplit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(TestSplit::Public),
            "private" => Ok(TestSplit::Private),
            "extra" => Ok(TestSplit::Extra),
            other => Err(anyhow!(
                "Unknown test split '{}' (expected public, private, or extra)",
                other
            )),
        }
    }
}

impl fmt::Display for TestSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A test case bundle: `public_input`, `public_output`, and so on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TestCases {
    groups: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
}

impl TestCases {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read test cases '{}'", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse test cases '{}'", path.display()))
    }

    /// Pair up the inputs and outputs of one split.
    pub fn split(&self, split: TestSplit) -> Result<Vec<TestCase>> {
        let inputs = self.group(split, "input")?;
        let outputs = self.group(split, "output")?;
        if inputs.len() != outputs.len() {
            bail!(
                "Split '{}' has {} inputs but {} outputs",
                split,
                inputs.len(),
                outputs.len()
            );
        }
        Ok(inputs
            .iter()
            .zip(outputs)
            .map(|(input, expected)| TestCase {
                input: input.clone(),
                expected: expected.clone(),
            })
            .collect())
    }

    fn group(&self, split: TestSplit, side: &str) -> Result<&Vec<String>> {
        let key = format!("{}_{}", split, side);
        self.groups
            .get(&key)
            .ok_or_else(|| anyhow!("Test cases have no '{}' entry", key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    Failed,
    Timeout,
    Error,
}

impl Verdict {
    fn from_run(run: &CommandRunResult, expected: &str) -> Self {
        if run.timed_out {
            Verdict::Timeout
        } else if !run.success() {
            Verdict::Error
        } else if run.stdout.trim() == expected.trim() {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    /// Worth a traced rerun.
    pub fn needs_trace(self) -> bool {
        matches!(self, Verdict::Failed | Verdict::Error)
    }
}

/// Result of one judged run.
#[derive(Debug, Clone)]
pub struct Judgement {
    pub verdict: Verdict,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSignal {
    pub case_index: usize,
    pub verdict: Verdict,
    pub compiler_error: Option<String>,
    pub stderr: String,
    pub timeout_flag: bool,
    pub traceback: Option<String>,
    pub variable_trace: Option<String>,
}

/// Verdict counts for one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub test_cases: usize,
    pub passed: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub errors: usize,
}

impl VerdictSummary {
    pub fn from_signals(signals: &[ErrorSignal]) -> Self {
        let mut summary = Self {
            test_cases: signals.len(),
            ..Self::default()
        };
        for signal in signals {
            match signal.verdict {
                Verdict::Passed => summary.passed += 1,
                Verdict::Failed => summary.failed += 1,
                Verdict::Timeout => summary.timeouts += 1,
                Verdict::Error => summary.errors += 1,
            }
        }
        summary
    }
}

/// Signals for one candidate file, or why none could be collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReport {
    pub code: PathBuf,
    pub summary: VerdictSummary,
    pub signals: Vec<ErrorSignal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignalOptions {
    pub python: String,
    pub judge_timeout: Duration,
    pub max_chars: usize,
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SignalOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            python: config.python.clone(),
            judge_timeout: config.judge_timeout(),
            max_chars: config.max_chars,
        }
    }
}

/// Run `program` on one case the way a contest judge would.
pub fn judge_case(program: &Path, case: &TestCase, options: &SignalOptions) -> Result<Judgement> {
    let mut command = Command::new(&options.python);
    command.arg("-B").arg(program);
    if let Some(dir) = program.parent() {
        command.current_dir(dir);
    }
    let run = run_command_with_timeout(&mut command, Some(case.input.clone()), options.judge_timeout)
        .map_err(|e| anyhow!(e))?;
    Ok(Judgement {
        verdict: Verdict::from_run(&run, &case.expected),
        stderr: tail_chars(&run.stderr, STDERR_TAIL_MAX_CHARS),
    })
}

/// First syntax error the interpreter reports for `program`.
///
/// Falls back to the tree-sitter check when the interpreter cannot be run.
pub fn compiler_error(program: &Path, source: &str, options: &SignalOptions) -> Option<String> {
    let mut command = Command::new(&options.python);
    command.arg("-B").arg("-c").arg(COMPILE_CHECK).arg(program);
    match run_command_with_timeout(&mut command, None, options.judge_timeout) {
        Ok(run) if run.success() => {
            let message = run.stdout.trim();
            (!message.is_empty()).then(|| message.to_string())
        }
        Ok(run) => {
            warn!(
                "Compile check for '{}' did not finish cleanly: {}",
                program.display(),
                tail_chars(run.stderr.trim(), STDERR_TAIL_MAX_CHARS)
            );
            syntax_issue(source).map(|issue| issue.to_string())
        }
        Err(err) => {
            warn!("Compile check for '{}' failed: {}", program.display(), err);
            syntax_issue(source).map(|issue| issue.to_string())
        }
    }
}

/// Judge `source` on every case and trace the ones that crash or mismatch.
pub fn collect_error_signals(
    source: &str,
    cases: &[TestCase],
    options: &SignalOptions,
) -> Result<Vec<ErrorSignal>> {
    let workdir = tempfile::Builder::new()
        .prefix("exectrace-candidate-")
        .tempdir()
        .context("Failed to create candidate directory")?;
    let program = workdir.path().join(CANDIDATE_FILE);
    fs::write(&program, source).context("Failed to write candidate program")?;

    let compiler_error = compiler_error(&program, source, options);
    let trace_options = TraceOptions::default()
        .python(options.python.clone())
        .max_chars(options.max_chars)
        .timeout(Some(options.judge_timeout))
        .launch(Launch::Script);

    let mut signals = Vec::with_capacity(cases.len());
    for (case_index, case) in cases.iter().enumerate() {
        let judgement = judge_case(&program, case, options)?;
        debug!(case_index, verdict = ?judgement.verdict, "judged case");

        let traced = judgement.verdict.needs_trace().then(|| {
            trace_script(
                &program,
                &trace_options
                    .clone()
                    .input(InputSource::Text(case.input.clone())),
            )
        });
        let (traceback, variable_trace) = match traced {
            Some(RunResult {
                traceback, trace, ..
            }) => (Some(traceback), Some(trace)),
            None => (None, None),
        };

        signals.push(ErrorSignal {
            case_index,
            verdict: judgement.verdict,
            compiler_error: compiler_error.clone(),
            stderr: judgement.stderr,
            timeout_flag: judgement.verdict == Verdict::Timeout,
            traceback,
            variable_trace,
        });
    }
    Ok(signals)
}

/// Collect signals for every candidate in parallel.
pub fn collect_all(
    candidates: &[PathBuf],
    cases: &[TestCase],
    options: &SignalOptions,
) -> Vec<CandidateReport> {
    candidates
        .par_iter()
        .map(|path| {
            let collected = fs::read_to_string(path)
                .with_context(|| format!("Failed to read candidate '{}'", path.display()))
                .and_then(|source| collect_error_signals(&source, cases, options));
            match collected {
                Ok(signals) => {
                    let summary = VerdictSummary::from_signals(&signals);
                    info!(
                        candidate = %path.display(),
                        passed = summary.passed,
                        test_cases = summary.test_cases,
                        "collected error signals"
                    );
                    CandidateReport {
                        code: path.clone(),
                        summary,
                        signals,
                        error: None,
                    }
                }
                Err(err) => CandidateReport {
                    code: path.clone(),
                    summary: VerdictSummary::default(),
                    signals: Vec::new(),
                    error: Some(format!("{:#}", err)),
                },
            }
        })
        .collect()
}
