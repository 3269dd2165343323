use anyhow::{Context, Result};
use clap::Parser;
use exectrace::config::Config;
use exectrace::signal::{collect_all, SignalOptions, TestCases, TestSplit};
use exectrace::util::init_logging;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "exectrace-signal",
    about = "Judge candidate Python programs and collect error signals with variable traces"
)]
struct Cli {
    /// Test case bundle with `<split>_input` and `<split>_output` lists
    #[arg(long)]
    tests: PathBuf,

    /// Candidate programs
    #[arg(long, required = true, num_args = 1..)]
    code: Vec<PathBuf>,

    /// public, private, or extra
    #[arg(long, default_value = "public")]
    split: TestSplit,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load();

    let cases = TestCases::load(&cli.tests)?.split(cli.split)?;
    let reports = collect_all(&cli.code, &cases, &SignalOptions::from_config(&config));
    let json = serde_json::to_string_pretty(&reports)?;

    match &cli.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("Failed to write report '{}'", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
