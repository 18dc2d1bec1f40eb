//! Path ignore rules for the scanner.
//!
//! Built-in build-output and tooling directories merged with the project's
//! `.gitignore`, matched with full gitignore semantics: `**`, anchoring with
//! a leading `/`, directory-only patterns and `!` negation. Later lines take
//! precedence, so the project's file can re-include a built-in exclusion.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

/// Patterns ignored in every project.
pub const BUILTIN_PATTERNS: &[&str] = &[
    "node_modules/",
    ".git/",
    "dist/",
    "build/",
    ".next/",
    ".cache/",
    "coverage/",
    ".turbo/",
    ".nuxt/",
    "out/",
    "public/build/",
    "storybook-static/",
    ".vscode/",
    ".idea/",
    ".vercel/",
    ".netlify/",
    ".env",
    ".env.*",
    "*.min.js",
    "*.bundle.js",
    "*.map",
];

/// Default time budget for matching one path.
pub const MATCH_BUDGET: Duration = Duration::from_secs(5);

/// Merged ignore rules.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    matcher: Gitignore,
    budget: Duration,
}

impl IgnoreList {
    /// Built-in patterns plus `<root>/.gitignore` when present.
    pub fn load(root: &Path) -> Self {
        let mut builder = builtin_builder(root);
        let gitignore = root.join(".gitignore");
        if gitignore.is_file() {
            if let Some(e) = builder.add(&gitignore) {
                warn!(error = %e, "some .gitignore lines were not understood");
            }
        } else {
            debug!("no .gitignore found, using built-in exclusions");
        }
        Self::build(&builder)
    }

    /// Built-in patterns followed by explicit pattern lines.
    pub fn from_patterns<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = builtin_builder(Path::new(""));
        add_lines(&mut builder, lines);
        Self::build(&builder)
    }

    fn build(builder: &GitignoreBuilder) -> Self {
        let matcher = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "could not compile ignore rules, nothing will be skipped");
            Gitignore::empty()
        });
        debug!(rules = matcher.num_ignores(), "ignore rules loaded");
        Self {
            matcher,
            budget: MATCH_BUDGET,
        }
    }

    /// Override the per-path time budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Whether a path relative to the scan root is ignored.
    ///
    /// A trailing `/` marks a directory. A file inside an ignored directory
    /// is ignored. If matching exceeds the budget the path is treated as not
    /// ignored.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        let normalized = rel_path.replace('\\', "/");
        let is_dir = normalized.ends_with('/');
        let trimmed = normalized.trim_matches('/');
        if trimmed.is_empty() {
            return false;
        }

        let started = Instant::now();
        let ignored = self
            .matcher
            .matched_path_or_any_parents(PathBuf::from(trimmed), is_dir)
            .is_ignore();
        if started.elapsed() > self.budget {
            warn!(path = %trimmed, "ignore pattern matching timed out, scanning path");
            return false;
        }
        ignored
    }
}

fn builtin_builder(root: &Path) -> GitignoreBuilder {
    let mut builder = GitignoreBuilder::new(root);
    add_lines(&mut builder, BUILTIN_PATTERNS);
    builder
}

fn add_lines<I, S>(builder: &mut GitignoreBuilder, lines: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for line in lines {
        if let Err(e) = builder.add_line(None, line.as_ref()) {
            warn!(pattern = %line.as_ref(), error = %e, "skipping invalid ignore pattern");
        }
    }
}
