//! Immutable view of the process environment.
//!
//! Captured once at startup and threaded through every phase. Phases that
//! need to add variables derive a new snapshot instead of mutating the
//! process environment, and the final snapshot becomes the child's
//! environment.

use std::collections::BTreeMap;

use crate::core::constants;

/// A point-in-time copy of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw value of a variable, including empty strings.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value of a variable, treating empty or whitespace-only values as unset.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Whether a variable is set to `true` or `1`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.non_empty(key), Some("true") | Some("1"))
    }

    /// Whether a variable is present at all.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// New snapshot where `pairs` only fill in variables that are absent.
    ///
    /// This is the merge used for `.env` files and vault secrets: anything the
    /// caller already exported wins.
    pub fn with_defaults<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = self.vars.clone();
        for (k, v) in pairs {
            vars.entry(k.into()).or_insert_with(|| v.into());
        }
        Self { vars }
    }

    /// New snapshot where `pairs` replace existing values.
    pub fn with_overrides<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = self.vars.clone();
        for (k, v) in pairs {
            vars.insert(k.into(), v.into());
        }
        Self { vars }
    }

    /// Iterate over all variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `DEBUG=true` was exported.
    pub fn is_debug(&self) -> bool {
        self.flag(constants::DEBUG_VAR)
    }

    /// Both the debug and reveal flags are set.
    pub fn reveal_secrets(&self) -> bool {
        self.is_debug() && self.flag(constants::REVEAL_VAR)
    }

    /// Output suppression was requested.
    pub fn is_suppressed(&self) -> bool {
        self.flag(constants::SUPPRESS_VAR)
    }

    /// A parent secure-run already assembled this environment.
    pub fn is_nested(&self) -> bool {
        self.flag(constants::NESTED_GUARD_VAR)
    }
}
