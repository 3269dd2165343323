//! Messages exchanged with the in-interpreter probe
//!
//! The request is written once to a JSON file before launch. Events come back
//! as one JSON object per line on the child's duplicated stdout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the probe starts the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Launch {
    /// Import the module and call the named function with the positional arguments.
    EntryPoint { name: String },
    /// Run the source file as `__main__`.
    Script,
}

impl Default for Launch {
    fn default() -> Self {
        Launch::EntryPoint {
            name: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub module: String,
    pub script: String,
    pub basename: String,
    pub launch: Launch,
    pub args: Vec<String>,
    pub suppress_stdout: bool,
    /// Identifiers to resolve, keyed by line number.
    pub lines: BTreeMap<usize, Vec<String>>,
}

/// What a resolved identifier turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Data,
    Namespace,
    Type,
    Callable,
}

impl ValueKind {
    /// Modules, classes, and callables are runtime furniture, not state.
    pub fn is_state(self) -> bool {
        matches!(self, ValueKind::Data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeValue {
    pub kind: ValueKind,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProbeEvent {
    Line {
        line: usize,
        values: BTreeMap<String, ProbeValue>,
    },
    Exit {
        has_error: bool,
        traceback: String,
    },
}
