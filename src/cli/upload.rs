//! Upload command.
//!
//! Pushes every `.env.bws.<scope-id>` file in the working directory into its
//! vault scope.

use crate::cli::output::{self, Tone};
use crate::core::constants::ENV_FILE;
use crate::core::env::Dotenv;
use crate::core::snapshot::EnvSnapshot;
use crate::core::upload::{self, FileReport, Uploader};
use crate::core::vault::HttpVault;
use crate::error::{AuthError, Result};

/// Upload all files, optionally clearing each scope first.
pub async fn execute(clear: bool) -> Result<i32> {
    let dir = std::env::current_dir()?;
    let snapshot = EnvSnapshot::capture()
        .with_defaults(Dotenv::load_optional(dir.join(ENV_FILE))?.into_map());

    let files = upload::discover(&dir)?;
    let vault = HttpVault::from_snapshot(&snapshot);
    if !vault.has_token() {
        return Err(AuthError::MissingToken.into());
    }

    output::header(&format!("Uploading {} file(s)", files.len()));
    for file in &files {
        output::list_item(&output::path(&file.name()));
    }
    if clear {
        output::warn("existing secrets in each scope will be deleted first");
    }

    let reports = Uploader::new(&vault)
        .with_clear(clear)
        .upload_all(&files)
        .await?;

    for report in &reports {
        render_warnings(report);
    }
    render_summary(&reports);
    upload::check(&reports)?;
    Ok(0)
}

fn render_warnings(report: &FileReport) {
    if !report.skipped.is_empty() {
        let mut lines = vec![format!("Skipped sensitive keys in {}:", report.file.name())];
        lines.extend(report.skipped.iter().map(|k| format!("  • {}", k)));
        lines.push("These are never uploaded to the vault.".to_string());
        output::boxed(Tone::Warning, &lines);
    }
    for key in &report.empty {
        output::warn(&format!(
            "empty or unresolved value for {} in {}",
            output::key(key),
            report.file.name()
        ));
    }
    if let Some(cleared) = report.cleared {
        output::dimmed(&format!("cleared {} secrets from {}", cleared, report.file.scope_id));
    }
}

fn render_summary(reports: &[FileReport]) {
    let (ok, failed): (Vec<&FileReport>, Vec<&FileReport>) =
        reports.iter().partition(|r| r.succeeded());

    if !ok.is_empty() {
        let mut lines = vec![format!(
            "SUCCESS! {} of {} file(s) uploaded correctly.",
            ok.len(),
            reports.len()
        )];
        lines.extend(
            ok.iter()
                .map(|r| format!("{} ({} secrets)", r.file.scope_id, r.uploaded.len())),
        );
        output::boxed(Tone::Success, &lines);
    }

    if !failed.is_empty() {
        let mut lines = vec![format!(
            "FAILED: {} of {} file(s) had errors.",
            failed.len(),
            reports.len()
        )];
        for report in failed {
            lines.push(format!("{}:", report.file.name()));
            lines.extend(
                report
                    .failed
                    .iter()
                    .map(|(key, reason)| format!("  • {}: {}", key, first_line(reason))),
            );
        }
        output::boxed(Tone::Error, &lines);
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}
