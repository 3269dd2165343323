//! Execution tracer: line plans on the way in, rendered entries on the way out
//!
//! The interpreter-side hook lives in `probe.py`. It knows which identifiers
//! to look up on which lines and shortens value text before sending it;
//! `render` leaves that shortened text unchanged. Filtering and entry layout
//! happen here.

pub mod protocol;

use crate::classify::{extract_identifiers, identifies, parseable_form};
use crate::render::render;
use crate::trace_log::TraceLog;
use protocol::{ProbeEvent, ProbeValue};
use std::collections::BTreeMap;
use tracing::debug;

/// Source of the interpreter-side line hook.
pub const PROBE_SOURCE: &str = include_str!("probe.py");

/// A source line worth recording and the identifiers it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    /// Original line text, trimmed, exactly as it is rendered.
    pub text: String,
    pub identifiers: Vec<String>,
}

/// Every interesting line of one source file, keyed by 1-based line number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinePlan {
    lines: BTreeMap<usize, PlannedLine>,
}

impl LinePlan {
    pub fn from_source(source: &str) -> Self {
        let mut lines = BTreeMap::new();
        for (idx, raw) in source.lines().enumerate() {
            let text = raw.trim();
            if text.is_empty() {
                continue;
            }
            let parseable = parseable_form(text);
            if !identifies(&parseable) {
                continue;
            }
            let identifiers: Vec<String> = extract_identifiers(&parseable).into_iter().collect();
            if identifiers.is_empty() {
                continue;
            }
            lines.insert(
                idx + 1,
                PlannedLine {
                    text: text.to_string(),
                    identifiers,
                },
            );
        }
        Self { lines }
    }

    pub fn get(&self, line: usize) -> Option<&PlannedLine> {
        self.lines.get(&line)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Identifier lists in the shape the probe request carries.
    pub fn identifier_table(&self) -> BTreeMap<usize, Vec<String>> {
        self.lines
            .iter()
            .map(|(&line, planned)| (line, planned.identifiers.clone()))
            .collect()
    }
}

/// How the traced program ended, as reported by the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub has_error: bool,
    pub traceback: String,
}

/// Trace text plus the exit report, if one arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOutcome {
    pub exit: Option<ExitReport>,
    pub trace: String,
}

/// Turns probe events for one run into trace-log entries.
#[derive(Debug)]
pub struct ExecutionTracer {
    plan: LinePlan,
    log: TraceLog,
    exit: Option<ExitReport>,
}

impl ExecutionTracer {
    pub fn new(plan: LinePlan, log: TraceLog) -> Self {
        Self {
            plan,
            log,
            exit: None,
        }
    }

    pub fn observe(&mut self, event: ProbeEvent) {
        match event {
            ProbeEvent::Line { line, values } => self.record_line(line, &values),
            ProbeEvent::Exit {
                has_error,
                traceback,
            } => {
                self.exit = Some(ExitReport {
                    has_error,
                    traceback,
                });
            }
        }
    }

    fn record_line(&mut self, line: usize, values: &BTreeMap<String, ProbeValue>) {
        let Some(planned) = self.plan.get(line) else {
            debug!(line, "ignoring event for unplanned line");
            return;
        };
        if let Some(entry) = compose_entry(line, &planned.text, values) {
            self.log.record(line, entry);
        }
    }

    pub fn finish(mut self) -> TraceOutcome {
        TraceOutcome {
            trace: self.log.finalize(),
            exit: self.exit,
        }
    }
}

/// Format one trace entry, or None when no identifier carries state.
///
/// Keys come out in lexicographic order since `values` is a sorted map.
pub fn compose_entry(
    line: usize,
    text: &str,
    values: &BTreeMap<String, ProbeValue>,
) -> Option<String> {
    let items: Vec<String> = values
        .iter()
        .filter(|(_, value)| value.kind.is_state())
        .filter_map(|(key, value)| {
            value
                .text
                .as_ref()
                .map(|text| format!("{}={}", key, render(text)))
        })
        .collect();

    if items.is_empty() {
        return None;
    }
    Some(format!(
        "line {:3}: '{}', variables before line executes: {}",
        line,
        text,
        items.join(", ")
    ))
}
