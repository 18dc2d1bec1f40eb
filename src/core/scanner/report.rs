//! The `requiredVars.env` report.
//!
//! A commented listing of names per directory, grouped by top-level
//! directory, followed by allowlist-only names. Reading it back keeps every
//! non-empty, non-comment line.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Local};
use tracing::debug;

use super::ScanResult;
use crate::error::{Result, ScanError};

/// Render a report.
pub fn render(result: &ScanResult, generated: DateTime<Local>) -> String {
    let mut lines = vec![
        "# Environment Variables Required by Directory".to_string(),
        format!("# Generated: {}", generated.format("%Y-%m-%d %H:%M:%S")),
        "#".to_string(),
        "# This file maps which environment variables are required in each directory.".to_string(),
        "#".to_string(),
    ];
    if !result.turbo.is_empty() {
        lines.push("# Variables from turbo.json:".to_string());
        lines.extend(result.turbo.iter().map(|v| format!("# - {}", v)));
        lines.push("#".to_string());
    }
    lines.push(String::new());

    let mut groups: BTreeMap<&str, Vec<(&String, &BTreeSet<String>)>> = BTreeMap::new();
    for (dir, names) in &result.by_dir {
        let top = dir.split('/').next().unwrap_or(".");
        groups.entry(top).or_default().push((dir, names));
    }

    for (top, dirs) in groups {
        lines.push(format!("# {}", top));
        lines.push(String::new());
        for (dir, names) in dirs {
            lines.push(format!("# {}", dir));
            lines.extend(names.iter().cloned());
            lines.push(String::new());
        }
    }

    let scanned = result.scanned();
    let turbo_only: Vec<&String> = result.turbo.iter().filter(|v| !scanned.contains(*v)).collect();
    if !turbo_only.is_empty() {
        lines.push("# Additional variables from turbo.json:".to_string());
        lines.extend(turbo_only.into_iter().cloned());
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Write a report to `path`.
///
/// # Errors
///
/// Returns `ScanError::WriteReport` if the file cannot be written.
pub fn write(path: &Path, result: &ScanResult) -> Result<()> {
    let text = render(result, Local::now());
    std::fs::write(path, text).map_err(|source| ScanError::WriteReport {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), names = result.required().len(), "wrote report");
    Ok(())
}

/// Read the required names from a report. A missing file is `Ok(None)`.
///
/// # Errors
///
/// Returns an I/O error for anything other than a missing file.
pub fn read(path: &Path) -> Result<Option<BTreeSet<String>>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse(&text))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Names listed in report text.
pub fn parse(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}
