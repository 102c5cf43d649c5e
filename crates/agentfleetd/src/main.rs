//! agentfleetd: the agentfleet daemon.
//!
//! Loads a fleet configuration, assembles the controller and drives the
//! verification and cleanup loops until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! agentfleetd check --config fleet.toml
//! agentfleetd run --config fleet.toml --simulate --provision linux:3
//! ```

mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use simulate::Demand;

const DEFAULT_FILTER: &str = "info,agentfleetd=debug,agentfleet=debug";

#[derive(Parser)]
#[command(name = "agentfleetd", about = "agentfleet daemon")]
struct Cli {
    /// Emit JSON log lines instead of human-readable ones.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a configuration file and print the controller status as JSON.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Run the controller and its background loops until Ctrl-C.
    Run {
        #[arg(long, short)]
        config: PathBuf,

        /// Use the in-memory simulated compute backend.
        #[arg(long)]
        simulate: bool,

        /// Initial demand as `LABEL:WORKLOAD` (empty label for unlabelled work). Repeatable.
        #[arg(long = "provision", value_parser = simulate::parse_demand)]
        demands: Vec<Demand>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Check { config } => {
            let controller = simulate::load(&config)?;
            println!("{}", serde_json::to_string_pretty(&controller.status())?);
            Ok(())
        }
        Command::Run {
            config,
            simulate,
            demands,
        } => {
            if !simulate {
                anyhow::bail!("no compute backend is available in this build; pass --simulate");
            }
            simulate::run(&config, demands).await
        }
    }
}
