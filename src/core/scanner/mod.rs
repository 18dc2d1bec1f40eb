//! Variable discovery.
//!
//! Statically scans source files for environment variable references and
//! produces the required set of names. Roots may be plain paths, globs, or
//! directory names searched for anywhere in the tree.

mod comments;
mod ignore;
pub mod report;

pub use comments::{strip_comments, Grammar};
pub use self::ignore::{IgnoreList, BUILTIN_PATTERNS};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::constants;
use crate::error::{Result, ScanError};

/// Roots scanned when none are given.
pub const DEFAULT_ROOTS: &[&str] = &["functions", "api", "apps/web/src", "packages"];

/// Extensions (without the dot) that are scanned.
pub const EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "vue", "mjs", "cjs", "mts", "cts"];

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:process\.env|import\.meta\.env)\.([A-Za-z0-9_]+)").expect("valid regex")
});

/// Variable names referenced in code, after comments are removed.
pub fn find_references(source: &str, grammar: Grammar) -> Vec<String> {
    let code = strip_comments(source, grammar);
    REFERENCE
        .captures_iter(&code)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// How a root argument selects files.
#[derive(Debug, Clone)]
pub enum Root {
    /// A path relative to the scan root.
    Path(PathBuf),
    /// Files under `base` whose path relative to `base` matches `pattern`.
    Glob { base: PathBuf, pattern: Pattern },
    /// Every directory with this name, anywhere outside ignored paths.
    Named(String),
}

impl Root {
    /// Classify a root argument.
    ///
    /// Anything with `/`, `*` or `?`, or equal to `.` or `..`, is a path or
    /// glob; a bare word is a directory name.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::InvalidPattern` if a glob cannot be compiled.
    pub fn parse(arg: &str) -> Result<Self> {
        let arg = arg.trim();
        let is_glob = arg.contains('*') || arg.contains('?');
        if !(arg.contains('/') || arg == "." || arg == ".." || is_glob) {
            return Ok(Self::Named(arg.to_string()));
        }
        if !is_glob {
            return Ok(Self::Path(PathBuf::from(arg)));
        }

        let wildcard = arg.find(['*', '?']).unwrap_or(0);
        let (base, pattern) = match arg[..wildcard].rfind('/') {
            Some(slash) => (&arg[..slash], &arg[slash + 1..]),
            None => ("", arg),
        };
        let pattern = Pattern::new(pattern).map_err(|e| ScanError::InvalidPattern {
            pattern: arg.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::Glob {
            base: PathBuf::from(base),
            pattern,
        })
    }

    /// Whether a `/`-separated path relative to a glob's base is selected.
    ///
    /// `*` and `?` stay within one segment; `**/` spans any number of them.
    pub fn glob_matches(pattern: &Pattern, rel: &str) -> bool {
        pattern.matches_with(rel, GLOB_OPTIONS)
    }
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Outcome of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Directory (relative to the scan root) to names referenced there.
    pub by_dir: BTreeMap<String, BTreeSet<String>>,
    /// Names from the build tool's environment allowlist.
    pub turbo: BTreeSet<String>,
    /// Files read.
    pub files_scanned: usize,
    /// Total references, counting repeats.
    pub references: usize,
}

impl ScanResult {
    /// Names found in source files.
    pub fn scanned(&self) -> BTreeSet<String> {
        self.by_dir.values().flatten().cloned().collect()
    }

    /// Every required name: scanned names plus the allowlist.
    pub fn required(&self) -> BTreeSet<String> {
        let mut all = self.scanned();
        all.extend(self.turbo.iter().cloned());
        all
    }

    /// Names referenced from more than one directory, with their counts.
    pub fn shared(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for names in self.by_dir.values() {
            for name in names {
                *counts.entry(name).or_default() += 1;
            }
        }
        let mut shared: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(k, n)| (k.to_string(), n))
            .collect();
        shared.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        shared
    }
}

/// Scanner bound to a repository root.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    ignore: IgnoreList,
}

impl Scanner {
    /// Scanner using the built-in rules and the root's `.gitignore`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ignore = IgnoreList::load(&root);
        Self { root, ignore }
    }

    /// Scanner with explicit ignore rules.
    pub fn with_ignore(root: impl Into<PathBuf>, ignore: IgnoreList) -> Self {
        Self {
            root: root.into(),
            ignore,
        }
    }

    /// Scan the given roots, or [`DEFAULT_ROOTS`] when empty.
    ///
    /// Missing directories are skipped with a warning. Finding no files is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::InvalidPattern` for an uncompilable glob.
    pub fn scan(&self, roots: &[String]) -> Result<ScanResult> {
        let roots: Vec<String> = if roots.is_empty() {
            DEFAULT_ROOTS.iter().map(|s| s.to_string()).collect()
        } else {
            roots.to_vec()
        };
        info!(roots = ?roots, "scanning for environment variables");

        let mut files = BTreeSet::new();
        for arg in &roots {
            match Root::parse(arg)? {
                Root::Path(rel) => self.collect_path(&rel, &mut files),
                Root::Glob { base, pattern } => {
                    let dir = self.root.join(&base);
                    if !self.exists_inside(&dir, arg) {
                        continue;
                    }
                    let mut under = BTreeSet::new();
                    self.collect_files(&dir, &mut under);
                    files.extend(under.into_iter().filter(|f| {
                        f.strip_prefix(&dir)
                            .map(|rel| Root::glob_matches(&pattern, &slash_path(rel)))
                            .unwrap_or(false)
                    }));
                }
                Root::Named(name) => {
                    let dirs = self.find_named_dirs(&name);
                    if dirs.is_empty() {
                        info!(name = %name, "no directories with this name, skipping");
                    }
                    for dir in dirs {
                        self.collect_files(&dir, &mut files);
                    }
                }
            }
        }

        let mut result = ScanResult {
            turbo: self.turbo_vars(),
            ..ScanResult::default()
        };

        if files.is_empty() {
            info!("no files found to scan");
            return Ok(result);
        }

        for file in &files {
            let source = match std::fs::read_to_string(file) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            result.files_scanned += 1;

            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
            let names = find_references(&source, Grammar::for_extension(ext));
            if names.is_empty() {
                continue;
            }
            result.references += names.len();

            let dir = file
                .parent()
                .and_then(|p| p.strip_prefix(&self.root).ok())
                .map(slash_path)
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ".".to_string());
            result.by_dir.entry(dir).or_default().extend(names);
        }

        debug!(
            files = result.files_scanned,
            references = result.references,
            unique = result.scanned().len(),
            "scan finished"
        );
        Ok(result)
    }

    fn collect_path(&self, rel: &Path, files: &mut BTreeSet<PathBuf>) {
        let path = self.root.join(rel);
        if !self.exists_inside(&path, &rel.display().to_string()) {
            return;
        }
        if path.is_file() {
            if has_scanned_extension(&path) {
                files.insert(path);
            }
        } else {
            self.collect_files(&path, files);
        }
    }

    fn exists_inside(&self, path: &Path, label: &str) -> bool {
        if !path.exists() {
            warn!(path = %label, "directory not found, skipping");
            return false;
        }
        if escapes_root(path.strip_prefix(&self.root).unwrap_or(path)) {
            info!(path = %label, "outside the repository root, skipping");
            return false;
        }
        true
    }

    fn rel(&self, path: &Path, is_dir: bool) -> String {
        let mut rel = slash_path(path.strip_prefix(&self.root).unwrap_or(path));
        if is_dir && !rel.is_empty() {
            rel.push('/');
        }
        rel
    }

    fn walk<'a>(&'a self, dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> + 'a {
        WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                e.depth() == 0 || !self.ignore.is_ignored(&self.rel(e.path(), e.file_type().is_dir()))
            })
            .filter_map(|e| e.ok())
    }

    fn collect_files(&self, dir: &Path, files: &mut BTreeSet<PathBuf>) {
        for entry in self.walk(dir) {
            if entry.file_type().is_file() && has_scanned_extension(entry.path()) {
                files.insert(entry.into_path());
            }
        }
    }

    fn find_named_dirs(&self, name: &str) -> Vec<PathBuf> {
        self.walk(&self.root)
            .filter(|e| e.depth() > 0 && e.file_type().is_dir() && e.file_name() == name)
            .map(|e| e.into_path())
            .collect()
    }

    /// Names from `turbo.json`: `globalEnv`, `tasks.*.env` and the legacy
    /// `pipeline.*.env`. A missing or unparseable file yields nothing.
    pub fn turbo_vars(&self) -> BTreeSet<String> {
        let path = self.root.join(constants::TURBO_FILE);
        let Ok(text) = std::fs::read_to_string(&path) else {
            debug!("no turbo.json, skipping allowlist");
            return BTreeSet::new();
        };
        match parse_turbo(&text) {
            Ok(vars) => vars,
            Err(e) => {
                warn!(error = %e, "could not parse turbo.json, continuing without it");
                BTreeSet::new()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurboConfig {
    #[serde(default)]
    global_env: Vec<String>,
    #[serde(default)]
    tasks: BTreeMap<String, TurboTask>,
    #[serde(default)]
    pipeline: BTreeMap<String, TurboTask>,
}

#[derive(Debug, Default, Deserialize)]
struct TurboTask {
    #[serde(default)]
    env: Vec<String>,
}

fn parse_turbo(text: &str) -> Result<BTreeSet<String>> {
    let config: TurboConfig =
        serde_json::from_str(text).map_err(|e| ScanError::Turbo(e.to_string()))?;
    let mut vars: BTreeSet<String> = config.global_env.into_iter().collect();
    for task in config.tasks.values().chain(config.pipeline.values()) {
        vars.extend(task.env.iter().cloned());
    }
    // Wildcards and negations are allowlist syntax, not variable names.
    vars.retain(|v| !v.contains('*') && !v.starts_with('!'));
    Ok(vars)
}

fn has_scanned_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn escapes_root(rel: &Path) -> bool {
    let mut depth: i32 = 0;
    for component in rel.components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            Component::RootDir | Component::Prefix(_) => return true,
            Component::CurDir => {}
        }
        if depth < 0 {
            return true;
        }
    }
    false
}
