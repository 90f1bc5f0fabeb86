//! MetabaseNet node binary
//!
//! Parses the CLI, validates the environment, assembles the module
//! container for the selected mode and runs it until a termination
//! signal arrives.

mod config;
mod entry;
mod modules;

use clap::Parser;
use tracing::error;

use config::{Cli, Config};
use entry::{init_logging, shutdown_signal, Entry, EntryError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return e.exit_code();
        }
    };

    init_logging(&config);

    if config.purge {
        return match Entry::purge(&config) {
            Ok(()) => {
                println!("reset storage and removed chunk files");
                0
            }
            Err(e) => {
                error!(error = %e, "purge failed");
                e.exit_code()
            }
        };
    }

    let mut entry = match bootstrap_and_run(config) {
        Ok(entry) => entry,
        Err(e) => {
            error!(error = %e, "startup failed");
            return e.exit_code();
        }
    };

    shutdown_signal().await;
    entry.exit();
    0
}

fn bootstrap_and_run(config: Config) -> Result<Entry, EntryError> {
    let mut entry = Entry::bootstrap(config)?;
    entry.run()?;
    Ok(entry)
}
