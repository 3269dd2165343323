//! Recency-ordered, character-budgeted log of rendered trace lines

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default total character budget for a finalized trace.
pub const DEFAULT_MAX_CHARS: usize = 2_000;

/// One entry per source line, ordered by the last time each line was touched.
///
/// Re-recording a line replaces its text and moves it to the newest position,
/// so loops leave only their final iteration behind.
#[derive(Debug, Clone)]
pub struct TraceLog {
    source_name: String,
    max_chars: usize,
    echo: bool,
    destination: Option<PathBuf>,
    entries: HashMap<usize, String>,
    recency: Vec<usize>,
}

impl TraceLog {
    pub fn new(source_name: impl Into<String>, max_chars: usize, echo: bool) -> Self {
        Self {
            source_name: source_name.into(),
            max_chars,
            echo,
            destination: None,
            entries: HashMap::new(),
            recency: Vec::new(),
        }
    }

    /// Also write the finalized text to `path`.
    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    pub fn len(&self) -> usize {
        self.recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recency.is_empty()
    }

    /// Upsert the text for `line` and mark it most recently touched.
    pub fn record(&mut self, line: usize, text: String) {
        self.entries.insert(line, text);
        if let Some(pos) = self.recency.iter().position(|&l| l == line) {
            self.recency.remove(pos);
        }
        self.recency.push(line);
    }

    /// Drain the log into its final text.
    ///
    /// Entries are taken newest first while the budget, charged `len + 1` per
    /// entry, stays non-negative; the first entry that overdraws it ends the
    /// walk and everything older is dropped. Retained entries come back in
    /// oldest-to-newest order. The log is empty afterwards, so a second call
    /// returns an empty string.
    ///
    /// A failure to write the destination file is logged and does not affect
    /// the returned text.
    pub fn finalize(&mut self) -> String {
        let mut remaining = self.max_chars as i64;
        let mut kept = Vec::new();

        while let Some(line) = self.recency.pop() {
            let Some(text) = self.entries.remove(&line) else {
                continue;
            };
            remaining -= text.chars().count() as i64 + 1;
            if remaining < 0 {
                break;
            }
            kept.push(text);
        }
        self.recency.clear();
        self.entries.clear();

        kept.reverse();
        let output = kept.join("\n");
        if let Some(path) = &self.destination {
            if let Err(err) = write_trace(path, &self.source_name, &output) {
                warn!("{:#}", err);
            }
        }
        if self.echo {
            println!("{}", output);
        }
        output
    }
}

fn write_trace(path: &Path, source_name: &str, output: &str) -> Result<()> {
    std::fs::write(path, output).with_context(|| {
        format!(
            "Failed to write trace for '{}' to '{}'",
            source_name,
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entries_come_back_in_touch_order() {
        let mut log = TraceLog::new("prog.py", 2_000, false);
        log.record(1, "one".to_string());
        log.record(2, "two".to_string());
        log.record(3, "three".to_string());
        assert_eq!(log.finalize(), "one\ntwo\nthree");
    }

    #[test]
    fn re_recording_replaces_and_moves_to_newest() {
        let mut log = TraceLog::new("prog.py", 2_000, false);
        log.record(4, "loop i=0".to_string());
        log.record(5, "after".to_string());
        log.record(4, "loop i=1".to_string());
        assert_eq!(log.len(), 2);
        assert_eq!(log.finalize(), "after\nloop i=1");
    }

    #[test]
    fn budget_keeps_newest_entries() {
        let mut log = TraceLog::new("prog.py", 10, false);
        log.record(1, "aaaa".to_string());
        log.record(2, "bbbb".to_string());
        log.record(3, "cccc".to_string());
        // 5 + 5 fits exactly, the third overdraws
        assert_eq!(log.finalize(), "bbbb\ncccc");
    }

    #[test]
    fn oversized_newest_entry_drops_everything() {
        let mut log = TraceLog::new("prog.py", 10, false);
        log.record(1, "a".to_string());
        log.record(2, "x".repeat(20));
        assert_eq!(log.finalize(), "");
    }

    #[test]
    fn output_respects_budget() {
        let mut log = TraceLog::new("prog.py", 100, false);
        for line in 1..=50 {
            log.record(line, format!("line {line}: value"));
        }
        let output = log.finalize();
        assert!(output.chars().count() <= 100);
        assert!(output.ends_with("line 50: value"));
    }

    #[test]
    fn finalize_is_single_use() {
        let mut log = TraceLog::new("prog.py", 10, false);
        log.record(1, "a".to_string());
        log.record(2, "x".repeat(20));
        assert_eq!(log.finalize(), "");
        assert!(log.is_empty());
        assert_eq!(log.finalize(), "");
    }

    #[test]
    fn write_failure_names_the_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("trace.txt");
        let err = write_trace(&path, "prog.py", "entry").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to write trace for 'prog.py'"));
    }

    #[test]
    fn finalize_writes_destination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        let mut log = TraceLog::new("prog.py", 2_000, false).with_destination(&path);
        log.record(7, "entry".to_string());
        assert_eq!(log.finalize(), "entry");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "entry");
    }

    #[test]
    fn unwritable_destination_keeps_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("trace.txt");
        let mut log = TraceLog::new("prog.py", 2_000, false).with_destination(&path);
        log.record(1, "entry".to_string());
        assert_eq!(log.finalize(), "entry");
        assert!(!path.exists());
    }
}
