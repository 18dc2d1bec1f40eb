//! Shared CLI output helpers for consistent terminal output.
//!
//! Everything goes to stderr so the wrapped command owns stdout.
//!
//! Color scheme (respects NO_COLOR):
//! - Green: success, checkmarks
//! - Red: errors
//! - Yellow: warnings
//! - Cyan: paths, commands, keys, hints
//! - Bold: headers, important values
//! - Dimmed: secondary info

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use console::{measure_text_width, style, StyledObject};

const RULE_WIDTH: usize = 56;

static QUIET: AtomicBool = AtomicBool::new(false);

/// Mute everything except errors and error boxes.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

fn quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Check if color output is disabled via NO_COLOR env var.
fn colors_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

fn paint<D: Display>(value: D, f: impl FnOnce(StyledObject<D>) -> StyledObject<D>) -> String {
    if colors_enabled() {
        f(style(value).for_stderr()).to_string()
    } else {
        value.to_string()
    }
}

fn say(line: impl Display) {
    if !quiet() {
        eprintln!("{}", line);
    }
}

/// Print a success message with checkmark (green).
///
/// Example: `✓ synced 12 variables`
pub fn success(msg: &str) {
    say(format!("{} {}", paint("✓", |s| s.green()), msg));
}

/// Print an error message (red). Never muted.
///
/// Example: `✗ bwsconfig.json not found`
pub fn error(msg: &str) {
    eprintln!("{} {}", paint("✗", |s| s.red()), msg);
}

/// Print a warning message (yellow).
pub fn warn(msg: &str) {
    say(format!("{} {}", paint("⚠", |s| s.yellow()), msg));
}

/// Print a hint message (cyan). Never muted, since hints follow errors.
///
/// Example: `→ set BWS_PROJECT=<name>`
pub fn hint(msg: &str) {
    eprintln!("{} {}", paint("→", |s| s.cyan()), paint(msg, |s| s.cyan()));
}

/// Print a bold section header.
pub fn header(title: &str) {
    say(paint(title, |s| s.bold()));
}

/// Print a key-value pair (label dimmed, value bold).
///
/// Example: `  project:  web`
pub fn kv(label: &str, value: impl Display) {
    say(format!(
        "  {}  {}",
        paint(label, |s| s.dim()),
        paint(value.to_string(), |s| s.bold())
    ));
}

/// Print a list item with bullet.
pub fn list_item(item: &str) {
    say(format!("  • {}", item));
}

/// Print a horizontal rule separator.
pub fn rule() {
    say(paint("─".repeat(RULE_WIDTH), |s| s.dim()));
}

/// Format a path string in cyan.
pub fn path(p: &str) -> String {
    paint(p, |s| s.cyan())
}

/// Format a command string in green.
pub fn cmd(c: &str) -> String {
    paint(c, |s| s.green())
}

/// Format a key name in cyan.
pub fn key(k: &str) -> String {
    paint(k, |s| s.cyan())
}

/// Print a dimmed/secondary message.
pub fn dimmed(msg: &str) {
    say(paint(msg, |s| s.dim()));
}

/// Print a section header with a separator line.
pub fn section(title: &str) {
    say("");
    header(title);
    rule();
}

/// Border color of a [`boxed`] block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Warning,
    Error,
}

fn tint(text: String, tone: Tone) -> String {
    match tone {
        Tone::Success => paint(text, |s| s.green()),
        Tone::Warning => paint(text, |s| s.yellow()),
        Tone::Error => paint(text, |s| s.red()),
    }
}

/// Lines of a bordered block, padded to the widest line.
pub fn frame(lines: &[String]) -> Vec<String> {
    let width = lines
        .iter()
        .map(|l| measure_text_width(l))
        .max()
        .unwrap_or(0)
        .max(RULE_WIDTH - 4);
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(format!("┌{}┐", "─".repeat(width + 2)));
    for line in lines {
        let pad = width - measure_text_width(line);
        out.push(format!("│ {}{} │", line, " ".repeat(pad)));
    }
    out.push(format!("└{}┘", "─".repeat(width + 2)));
    out
}

/// Print a bordered block.
///
/// Error blocks are never muted; they mark the failures CI logs must not
/// bury.
pub fn boxed(tone: Tone, lines: &[String]) {
    let framed = frame(lines);
    for line in framed {
        let line = tint(line, tone);
        if tone == Tone::Error {
            eprintln!("{}", line);
        } else {
            say(line);
        }
    }
}
