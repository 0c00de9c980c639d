//! Build automation tasks for RIOX
//!
//! Run with: cargo run -p xtask -- <command>

use clap::{Parser, Subcommand};
use std::process::Command;

const INTEGRATION: &str = "riox-integration-tests";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "RIOX build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Format check, clippy and the full test suite
    Ci,

    /// io_uring loopback tests with output, so skip reasons are visible
    Loopback,

    /// Reactor cycle benchmarks on the memory stack
    Bench,
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Commands::Ci => {
            cargo(&["fmt", "--all", "--check"])?;
            cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
            cargo(&["test", "--workspace"])?;
        }
        Commands::Loopback => {
            println!("Fixed buffer registration needs RLIMIT_MEMLOCK headroom (ulimit -l)");
            cargo(&["test", "-p", INTEGRATION, "--test", "uring_loopback", "--", "--nocapture"])?;
        }
        Commands::Bench => {
            cargo(&["bench", "-p", INTEGRATION, "--bench", "reactor"])?;
        }
    }

    Ok(())
}

fn cargo(args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(env!("CARGO")).args(args).status()?;
    anyhow::ensure!(status.success(), "cargo {} exited with {}", args.join(" "), status);
    Ok(())
}
