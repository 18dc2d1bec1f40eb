//! Command-line interface.

pub mod output;
pub mod run;
pub mod scan;
pub mod upload;

use clap::Parser;

use crate::error::Result;

/// secure-run - Fetch, seal and sync deployment secrets, then run a command.
#[derive(Parser, Debug)]
#[command(
    name = "secure-run",
    about = "Fetch, seal and sync deployment secrets, then run a command with them",
    version,
    after_help = "Examples:\n  secure-run npm run dev\n  secure-run \"npm run build && npm test\"\n  secure-run --upload-secrets --clearvars"
)]
pub struct Cli {
    /// Push .env.bws.<scope-id> files into the vault instead of running a command
    #[arg(long)]
    pub upload_secrets: bool,

    /// With --upload-secrets, delete each scope's existing secrets first
    #[arg(long = "clearvars", visible_alias = "clear-vars", requires = "upload_secrets")]
    pub clear_vars: bool,

    /// Rescan for required variables even if a report exists
    #[arg(long)]
    pub rescan: bool,

    /// Only regenerate the required variables report, optionally for the given paths
    #[arg(long, value_name = "PATH", num_args = 0.., conflicts_with = "upload_secrets")]
    pub scan_only: Option<Vec<String>>,

    /// Verbose diagnostics (same as DEBUG=true)
    #[arg(long)]
    pub debug: bool,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// What to do, decided from the flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run { command: Vec<String>, rescan: bool },
    Upload { clear: bool },
    Scan { paths: Vec<String> },
}

impl Cli {
    pub fn command(&self) -> Command {
        if self.upload_secrets {
            return Command::Upload {
                clear: self.clear_vars,
            };
        }
        if let Some(paths) = &self.scan_only {
            let mut paths = paths.clone();
            paths.extend(self.command.iter().cloned());
            return Command::Scan { paths };
        }
        Command::Run {
            command: self.command.clone(),
            rescan: self.rescan,
        }
    }
}

/// Execute a command, returning the process exit code.
pub async fn execute(command: Command, debug: bool) -> Result<i32> {
    match command {
        Command::Run { command, rescan } => run::execute(&command, rescan, debug).await,
        Command::Upload { clear } => upload::execute(clear).await,
        Command::Scan { paths } => scan::execute(&paths),
    }
}
