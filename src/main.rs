//! secure-run - Fetch, seal and sync deployment secrets, then run a command.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use secure_run::cli::output::{self, Tone};
use secure_run::cli::{execute, Cli};
use secure_run::core::constants::{DEBUG_VAR, LOG_FILTER_VAR, SUPPRESS_VAR};
use secure_run::error::Error;

fn flag(var: &str) -> bool {
    matches!(std::env::var(var).as_deref(), Ok("true") | Ok("1"))
}

fn main() {
    let cli = Cli::parse();
    let debug = cli.debug || flag(DEBUG_VAR);
    let suppressed = flag(SUPPRESS_VAR);

    // Initialize tracing subscriber with env-filter support
    let filter = EnvFilter::try_from_env(LOG_FILTER_VAR).unwrap_or_else(|_| {
        if suppressed {
            EnvFilter::new("secure_run=error")
        } else if debug {
            EnvFilter::new("secure_run=debug")
        } else {
            EnvFilter::new("secure_run=info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    output::set_quiet(suppressed);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            output::error(&format!("failed to start async runtime: {}", e));
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(execute(cli.command(), debug));
    drop(runtime);

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            report(&e);
            std::process::exit(1);
        }
    }
}

/// Print an error, in a bordered block for the classes CI logs must not bury.
fn report(e: &Error) {
    if e.is_prominent() {
        let mut lines = vec![title(e).to_string(), String::new(), e.to_string()];
        if let Some(hint) = e.hint() {
            lines.push(String::new());
            lines.push(format!("→ {}", hint));
        }
        output::boxed(Tone::Error, &lines);
        return;
    }
    output::error(&e.to_string());
    if let Some(hint) = e.hint() {
        output::hint(hint);
    }
}

fn title(e: &Error) -> &'static str {
    match e {
        Error::Reconcile(_) => "PLATFORM SYNC FAILED, deployment stopped",
        Error::Auth(_) => "VAULT ACCESS TOKEN PROBLEM",
        _ => "SECRETS NOT LOADED",
    }
}
