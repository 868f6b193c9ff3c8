use std::error::Error;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use commands::{
    fetch::{self, FetchArgs},
    run::{self, RunArgs},
    status::{self, StatusArgs},
    validate::{self, ValidateArgs},
};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "orch", about = "Run parameter sweeps on a local job directory")]
struct Cli {
    /// Raise log verbosity (`-v` debug, `-vv` trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create and start the experiment described by a sweep plan.
    Run(RunArgs),
    /// Report the status of an experiment recorded in an id file.
    Status(StatusArgs),
    /// Copy files out of a simulation's job directory.
    Fetch(FetchArgs),
    /// Check a sweep plan without running it.
    Validate(ValidateArgs),
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let outcome: Result<bool, Box<dyn Error>> = match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Status(args) => status::run(&args),
        Command::Fetch(args) => fetch::run(&args),
        Command::Validate(args) => validate::run(&args),
    };
    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}
