//! Run command.
//!
//! Assembles the environment through the orchestrator, renders its progress
//! and runs the wrapped command.

use crate::cli::output::{self, Tone};
use crate::core::constants::{self, ORG_ID_VAR};
use crate::core::orchestrator::{self, Event, Observer, Orchestrator, Summary};
use crate::core::resolver::TerminalChooser;
use crate::core::snapshot::EnvSnapshot;
use crate::error::Result;

/// Run `command` with the assembled environment.
pub async fn execute(command: &[String], rescan: bool, debug: bool) -> Result<i32> {
    let mut snapshot = EnvSnapshot::capture();
    if debug {
        snapshot = snapshot.with_overrides([(constants::DEBUG_VAR, "true")]);
    }
    let dir = std::env::current_dir()?;
    let terminal = Terminal {
        org_id: snapshot.non_empty(ORG_ID_VAR).map(str::to_string),
    };

    let prepared = Orchestrator::new(&dir, snapshot, &TerminalChooser, &terminal)
        .with_rescan(rescan)
        .prepare()
        .await?;

    if command.is_empty() {
        output::warn("no command provided to execute");
        return Ok(0);
    }

    output::dimmed(&format!("running {}", output::cmd(&command.join(" "))));
    let code = orchestrator::execute(command, &prepared.env, &dir).await;
    drop(prepared.guard);
    code
}

/// Renders pipeline events on the terminal.
struct Terminal {
    org_id: Option<String>,
}

impl Terminal {
    fn summary(&self, s: &Summary) {
        output::section("Environment");
        output::kv("project:    ", &s.project);
        output::kv("environment:", &s.environment);
        output::kv("scope:      ", &s.scope_id);
        output::kv("loaded:     ", format!("{} secrets", s.loaded));
        match &s.control {
            Some((name, value)) => output::kv(&format!("{:<12}", format!("{}:", name)), value),
            None => output::kv("control:    ", "missing"),
        }
        output::rule();
    }
}

impl Observer for Terminal {
    fn notify(&self, event: Event) {
        match event {
            Event::Nested => output::dimmed("nested run, reusing the parent environment"),
            Event::Scanned { files, names } => output::success(&format!(
                "scanned {} files, {} required variables",
                files, names
            )),
            Event::ScanReused { names } => output::dimmed(&format!(
                "using {} ({} variables, --rescan to refresh)",
                constants::REQUIRED_VARS_FILE,
                names
            )),
            Event::TokenMissing => output::boxed(
                Tone::Warning,
                &[
                    "BWS_ACCESS_TOKEN is not set".to_string(),
                    String::new(),
                    "Continuing with local .env values only.".to_string(),
                    "Create a machine account token:".to_string(),
                    constants::machine_accounts_url(self.org_id.as_deref()),
                ],
            ),
            Event::TokenInvalid { reason } => output::boxed(
                Tone::Error,
                &[
                    "BWS_ACCESS_TOKEN was rejected".to_string(),
                    reason,
                    String::new(),
                    "Continuing with local .env values only.".to_string(),
                    "Check or regenerate the token:".to_string(),
                    constants::machine_accounts_url(self.org_id.as_deref()),
                ],
            ),
            Event::ConfigRefreshed { documents } => output::success(&format!(
                "applied {} remote configuration document(s)",
                documents
            )),
            Event::Resolved(resolution) => output::dimmed(&format!(
                "selected {} ({}) via {:?}",
                resolution.project.name,
                resolution.environment,
                resolution.source
            )),
            Event::Loaded { scope_id, count } => output::success(&format!(
                "loaded {} secrets from {}",
                count,
                output::key(&scope_id)
            )),
            Event::Synced {
                platform,
                project,
                outcome,
            } => output::boxed(
                Tone::Success,
                &[
                    format!("{} variables synced for {}", platform.display_name(), project),
                    format!("target: {}", outcome.target.name),
                    format!(
                        "deleted {}  updated {}  unchanged {}  protected {}",
                        outcome.deleted.len(),
                        outcome.upserted.len(),
                        outcome.unchanged,
                        outcome.protected.len()
                    ),
                ],
            ),
            Event::Summary(summary) => self.summary(&summary),
            Event::Revealed { bundle, secrets } => {
                output::section(&format!("Decrypted {}", bundle));
                for (key, value) in &secrets {
                    output::kv(&output::key(key), value);
                }
            }
        }
    }
}
