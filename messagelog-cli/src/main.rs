//! Message log CLI - offline verification of message log archives.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const AFTER_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Invalid arguments (e.g. malformed hex digest)
  65  Verification failed (broken chain, tampered record, untrusted token)
  66  Input file not found or unreadable
  74  I/O error";

#[derive(Parser)]
#[command(name = "messagelog")]
#[command(author, version, about = "Offline verification of secure message log archives", long_about = None)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report through the exit code
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify one archive file
    Verify {
        /// Path to the archive (.zip)
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Digest of the preceding archive (hex); the archive seed must match it
        #[arg(long, value_name = "HEX")]
        previous_digest: Option<String>,

        /// Expected digest of this archive (hex)
        #[arg(long, value_name = "HEX")]
        expect_digest: Option<String>,

        /// PEM file with trusted TSA certificates (repeatable)
        #[arg(long = "tsa-cert", value_name = "PEM")]
        tsa_certs: Vec<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a sequence of archives and their chaining, oldest first
    Chain {
        /// Paths to the archives, in chain order
        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,

        /// Digest preceding the first archive (hex)
        #[arg(long, value_name = "HEX")]
        previous_digest: Option<String>,

        /// PEM file with trusted TSA certificates (repeatable)
        #[arg(long = "tsa-cert", value_name = "PEM")]
        tsa_certs: Vec<PathBuf>,
    },

    /// List the contents of an archive without verifying it
    Inspect {
        /// Path to the archive (.zip)
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Verify {
            archive,
            previous_digest,
            expect_digest,
            tsa_certs,
            json,
        } => commands::verify::execute(commands::verify::VerifyArgs {
            archive,
            previous_digest,
            expect_digest,
            tsa_certs,
            json,
            quiet: cli.quiet,
        }),
        Commands::Chain {
            archives,
            previous_digest,
            tsa_certs,
        } => commands::chain::execute(archives, previous_digest, tsa_certs, cli.quiet),
        Commands::Inspect { archive, json } => commands::inspect::execute(archive, json),
    };

    if let Err(err) = result {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = exit.message {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}
