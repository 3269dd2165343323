//! exectrace library crate
//!
//! Runs a Python program in a fresh interpreter and reports, for each
//! interesting line it executed, the values of the variables that line reads.
//! The binaries are thin wrappers over [`trace`] and [`signal`].

pub mod classify;
pub mod config;
pub mod render;
pub mod runner;
pub mod signal;
pub mod trace;
pub mod trace_log;
pub mod tracer;
pub mod util;

pub use runner::InputSource;
pub use trace::{trace, trace_script, RunResult, TraceOptions};
pub use tracer::protocol::Launch;
