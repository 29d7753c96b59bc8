// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::{Parser, Subcommand};
use rrdkit::{ModifyOptions, ModifyRequest};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rrdkit", version, about = "Edit round-robin database files")]
struct Cli {
    /// Log debug detail to stderr
    #[arg(long, short = 'v', global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or remove columns, writing a linearized copy
    Modify {
        /// Caching daemon address (defaults to $RRDCACHED_ADDRESS)
        #[arg(long, short = 'd')]
        daemon: Option<String>,

        /// Source database
        source: PathBuf,

        /// Destination database, or '-' for stdout
        destination: String,

        /// DS:<name>:<type>:<heartbeat>:<min>:<max> or DEL:<name>
        #[arg(allow_hyphen_values = true)]
        changes: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Modify {
            daemon,
            source,
            destination,
            changes,
        } => {
            let options = ModifyOptions { daemon };
            let request = ModifyRequest::from_args(&changes);
            rrdkit::run(&options, &source, &destination, &request).map(|_| ())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
