use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pgr::{require_root, Config, Harness, Report, Shell};

/// Drive a SCSI-3 persistent-reservation conformance suite against one
/// shared logical unit through two or three initiator interfaces.
#[derive(Parser, Debug)]
#[command(name = "pgrcli", version, about)]
struct Cli {
    /// Harness configuration file
    #[arg(short, long, default_value = "pgr.yml")]
    config: PathBuf,

    /// Only run fixtures whose name contains this string
    #[arg(short, long)]
    scenario: Option<String>,

    /// List fixture names and exit
    #[arg(long)]
    list: bool,

    /// Log every command and response
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list {
        for fixture in pgr::scenarios::all::<Shell>() {
            println!("{}", fixture.name());
        }
        return ExitCode::SUCCESS;
    }

    // anything wrong before the first fixture is a setup failure with its
    // own exit code
    let harness = match set_up(&cli) {
        Ok(harness) => harness,
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            return ExitCode::from(2);
        }
    };

    match harness.run(cli.scenario.as_deref()) {
        Ok(report) => {
            print_report(&report);
            if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn set_up(cli: &Cli) -> Result<Harness<Shell>> {
    require_root()?;
    let cfg = Config::read(&cli.config)?;
    let harness = Harness::new(cfg, Shell);
    harness.preflight()?;
    Ok(harness)
}

fn print_report(report: &Report) {
    for result in report.results() {
        match result.failure() {
            None => println!("PASS {}", result.name()),
            Some(failure) => println!("FAIL {}: {}", result.name(), failure),
        }
    }
    println!(
        "{} passed, {} failed, {} total",
        report.passed(),
        report.failed(),
        report.results().len(),
    );
}
