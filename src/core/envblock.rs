//! The selection block inside the local `.env` file.
//!
//! The block is modelled as data ([`EnvBlock`]) and rendered
//! deterministically. Splicing it into a file replaces only the lines
//! between the BEGIN and END markers; every other line is kept as is. The
//! file always ends with exactly one newline.

use std::path::Path;

use tracing::debug;

use crate::core::constants::{BLOCK_BEGIN, BLOCK_END, ENVIRONMENT_VAR, PROJECT_VAR, TOKEN_VAR};
use crate::error::Result;

/// Environments offered when a project configures none.
pub const DEFAULT_ENVIRONMENTS: &[&str] = &["local", "dev", "prod"];

/// The persisted (project, environment) choice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub project: Option<String>,
    pub environment: Option<String>,
}

/// Structured contents of the selection block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvBlock {
    pub projects: Vec<String>,
    pub selected_project: String,
    pub environments: Vec<String>,
    pub selected_environment: String,
}

impl EnvBlock {
    /// Build a block. An empty environment list falls back to
    /// [`DEFAULT_ENVIRONMENTS`].
    pub fn new(
        projects: Vec<String>,
        selected_project: impl Into<String>,
        environments: Vec<String>,
        selected_environment: impl Into<String>,
    ) -> Self {
        let environments = if environments.is_empty() {
            DEFAULT_ENVIRONMENTS.iter().map(|s| s.to_string()).collect()
        } else {
            environments
        };
        Self {
            projects,
            selected_project: selected_project.into(),
            environments,
            selected_environment: selected_environment.into(),
        }
    }

    /// Render the block, markers included.
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![
            BLOCK_BEGIN.to_string(),
            String::new(),
            "# Project options (uncomment to switch)".to_string(),
        ];
        for project in &self.projects {
            let line = format!("{}={}", PROJECT_VAR, project);
            lines.push(toggle(line, *project == self.selected_project));
        }

        lines.push(String::new());
        lines.push("# Environment options (uncomment to switch)".to_string());
        for env in &self.environments {
            let line = format!("{}={}  # For {}", ENVIRONMENT_VAR, env, describe(env));
            lines.push(toggle(line, *env == self.selected_environment));
        }

        lines.push(String::new());
        lines.push(BLOCK_END.to_string());
        lines
    }
}

fn toggle(line: String, active: bool) -> String {
    if active {
        line
    } else {
        format!("# {}", line)
    }
}

fn describe(env: &str) -> String {
    match env {
        "local" => "local development".to_string(),
        "dev" | "development" => "development/preview deployments".to_string(),
        "prod" | "production" => "production deployments".to_string(),
        other => format!("{} deployments", other),
    }
}

/// Locate the block's (begin, end) line indexes.
fn find_block(lines: &[&str]) -> Option<(usize, usize)> {
    let begin = lines.iter().position(|l| l.trim_end() == BLOCK_BEGIN)?;
    let end = lines[begin..]
        .iter()
        .position(|l| l.trim_end() == BLOCK_END)
        .map(|offset| begin + offset)?;
    Some((begin, end))
}

fn active_value<'a>(lines: &[&'a str], var: &str) -> Option<&'a str> {
    let prefix = format!("{}=", var);
    lines.iter().find_map(|line| {
        let rest = line.trim().strip_prefix(prefix.as_str())?;
        let value = rest.split('#').next().unwrap_or("").trim();
        (!value.is_empty()).then_some(value)
    })
}

/// Read the persisted selection from `.env` text.
///
/// Looks inside the block when there is one, otherwise at the whole file.
/// The first uncommented assignment wins.
pub fn read_selection(text: &str) -> Selection {
    let lines: Vec<&str> = text.split('\n').collect();
    let scope: &[&str] = match find_block(&lines) {
        Some((begin, end)) => &lines[begin..=end],
        None => &lines,
    };
    Selection {
        project: active_value(scope, PROJECT_VAR).map(str::to_string),
        environment: active_value(scope, ENVIRONMENT_VAR).map(str::to_string),
    }
}

/// Splice `block` into `text`.
///
/// An existing block is replaced in place. Otherwise the block goes after
/// the access token lines, or at the end of the file.
pub fn splice(text: &str, block: &EnvBlock) -> String {
    let rendered = block.render();
    let body = text.strip_suffix('\n').unwrap_or(text);
    let lines: Vec<&str> = if body.is_empty() {
        Vec::new()
    } else {
        body.split('\n').collect()
    };

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + rendered.len() + 2);

    if let Some((begin, end)) = find_block(&lines) {
        out.extend(lines[..begin].iter().map(|l| l.to_string()));
        out.extend(rendered);
        out.extend(lines[end + 1..].iter().map(|l| l.to_string()));
    } else if let Some(token) = lines.iter().position(|l| l.contains(TOKEN_VAR)) {
        // Extend over the token's own comment lines.
        let mut insert = token + 1;
        while insert < lines.len() {
            let next = lines[insert].trim();
            if next.is_empty() || !(next.starts_with('#') || next.contains(TOKEN_VAR)) {
                break;
            }
            insert += 1;
        }
        out.extend(lines[..insert].iter().map(|l| l.to_string()));
        out.push(String::new());
        out.extend(rendered);
        match lines.get(insert) {
            Some(next) if !next.trim().is_empty() => out.push(String::new()),
            _ => {}
        }
        out.extend(lines[insert..].iter().map(|l| l.to_string()));
    } else {
        out.extend(lines.iter().map(|l| l.to_string()));
        if out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push(String::new());
        }
        out.extend(rendered);
    }

    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    let mut result = out.join("\n");
    result.push('\n');
    result
}

/// Write `block` into the file at `path`, creating it if needed.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read or written.
pub fn persist(path: &Path, block: &EnvBlock) -> Result<()> {
    let current = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let updated = splice(&current, block);
    if updated != current {
        std::fs::write(path, updated)?;
        debug!(
            path = %path.display(),
            project = %block.selected_project,
            environment = %block.selected_environment,
            "updated selection block"
        );
    }
    Ok(())
}
