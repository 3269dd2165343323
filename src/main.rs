use anyhow::{Context, Result};
use clap::Parser;
use exectrace::config::{parse_timeout, Config};
use exectrace::util::init_logging;
use exectrace::{trace, InputSource, TraceOptions};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "exectrace",
    about = "Show the variable values each line of a Python module read as it ran",
    version
)]
struct Args {
    /// Dotted module identifier, resolved under --root
    #[arg(long)]
    module: String,

    /// Let the program print to the console and read this terminal's stdin
    #[arg(long)]
    show_stdout: bool,

    /// Wall-clock limit in seconds
    #[arg(long, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Character budget for the trace
    #[arg(long)]
    max_chars: Option<usize>,

    /// Directory the module identifier is resolved against
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Feed this file to the program's stdin
    #[arg(long)]
    stdin: Option<PathBuf>,

    /// Also write the trace to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the whole result as JSON instead of the bare trace
    #[arg(long)]
    json: bool,

    /// Arguments passed to the module's `main`
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> Result<ExitCode> {
    init_logging();
    let args = Args::parse();
    let config = Config::load();

    // Live mode waits indefinitely unless a limit is given
    let timeout = match args.timeout {
        None if args.show_stdout => None,
        None => config.timeout(),
        limit => limit,
    };
    let input = match &args.stdin {
        Some(path) => InputSource::Text(
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read stdin file '{}'", path.display()))?,
        ),
        None if args.show_stdout => InputSource::Inherit,
        None => InputSource::Null,
    };

    let mut options = TraceOptions::from_config(&config)
        .root(&args.root)
        .timeout(timeout)
        .suppress_stdout(!args.show_stdout)
        .input(input)
        .echo(!args.json);
    options.args = args.args.clone();
    if let Some(max_chars) = args.max_chars {
        options = options.max_chars(max_chars);
    }
    if let Some(path) = &args.output {
        options = options.destination(path);
    }

    let result = trace(&args.module, &options);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !result.traceback.is_empty() {
        eprintln!("{}", result.traceback);
    }

    Ok(if result.has_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
