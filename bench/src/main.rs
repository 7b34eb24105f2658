//! Config-driven benchmark sweep runner.
//!
//! Reads a declarative algorithm registry, expands parameter combinations,
//! runs the algorithm binary over benchmark instances, and records results in
//! per-algorithm CSV ledgers under the out directory.

use anyhow::Result;
use clap::{Parser, Subcommand};

use bench::cli::{self, BatchArgs, ListArgs, RunArgs};
use bench::{exit_codes, logging};

#[derive(Parser)]
#[command(name = "bench", version, about = "Config-driven benchmark sweep runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List algorithms declared in the registry.
    List(ListArgs),
    /// Sweep one algorithm over selected benchmark files.
    Run(RunArgs),
    /// Run algorithms from a JSON/YAML batch config file.
    Batch(BatchArgs),
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::List(args) => cli::cmd_list(&args),
        Command::Run(args) => cli::cmd_run(&args),
        Command::Batch(args) => cli::cmd_batch(&args),
    }
}
