//! Dotenv-format parsing and serialization.
//!
//! Two dialects are understood. Ordinary `.env` files (the local selection
//! file and upload sources) follow the usual rules: comments, `export `
//! prefixes, quoted values and `${VAR}` interpolation. Bundle plaintext and
//! vault listings use a looser line format where any line that does not look
//! like `KEY=value` continues the previous value.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ConfigError, Result};

/// Ordered key/value pairs from a dotenv file.
///
/// Later duplicates replace earlier ones in place, so iteration order is the
/// order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dotenv {
    entries: Vec<(String, String)>,
}

impl Dotenv {
    /// Read and parse a dotenv file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFile` if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Like [`Dotenv::load`], but a missing file is an empty result.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse dotenv text.
    ///
    /// Skips blank lines and `#` comments, strips an optional `export `
    /// prefix, unquotes single- and double-quoted values, and drops trailing
    /// ` # comments` from unquoted values.
    pub fn parse(contents: &str) -> Self {
        let mut env = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                env.insert(key, parse_value(value.trim()));
            }
        }

        env
    }

    /// Build from pairs, keeping the last value for duplicate keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::default();
        for (k, v) in pairs {
            env.insert(k, v);
        }
        env
    }

    /// Set a value, replacing any existing one for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All entries in file order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Consume into a sorted map.
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries.into_iter().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand `${VAR}` references using earlier values from the same file.
    ///
    /// Unknown references expand to the empty string. Returns the names of
    /// references that could not be resolved.
    pub fn interpolate(&mut self) -> Vec<String> {
        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        let mut unresolved = Vec::new();

        for (key, value) in self.entries.iter_mut() {
            let expanded = expand(value, &resolved, &mut unresolved);
            *value = expanded;
            resolved.insert(key.clone(), value.clone());
        }

        unresolved.sort();
        unresolved.dedup();
        unresolved
    }
}

fn expand(value: &str, known: &BTreeMap<String, String>, missing: &mut Vec<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match known.get(name) {
                    Some(v) => out.push_str(v),
                    None => missing.push(name.to_string()),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn parse_value(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return unescape_double_quoted(&raw[1..raw.len() - 1]);
    }

    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }

    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn unescape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.\-]*)=(.*)$").expect("valid regex"));

/// Parse `KEY=value` lines where non-assignment lines continue the previous
/// value.
///
/// A line starts a new variable when it contains `=`, does not start with a
/// space or tab, and its left side is a plausible name. Every other
/// non-empty line is appended to the current value with a newline.
pub fn parse_multiline(contents: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let starts_new = !line.starts_with(' ') && !line.starts_with('\t');
        match ASSIGNMENT.captures(line).filter(|_| starts_new) {
            Some(caps) => {
                if let Some((k, v)) = current.take() {
                    vars.insert(k, v);
                }
                current = Some((caps[1].to_string(), caps[2].to_string()));
            }
            None => {
                if let Some((_, v)) = current.as_mut() {
                    v.push('\n');
                    v.push_str(line);
                }
            }
        }
    }

    if let Some((k, v)) = current {
        vars.insert(k, v);
    }
    vars
}

/// Serialize pairs as raw `KEY=value` lines, readable by [`parse_multiline`].
pub fn to_multiline<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}
