//! Project configuration.
//!
//! Handles locating, reading, validating and merging `bwsconfig.json`.
//!
//! ```json
//! { "projects": [{ "projectName": "web", "platform": "netlify",
//!                  "vaultProjectIds": { "dev": "<uuid>", "prod": "<uuid>" },
//!                  "preserveVars": ["TOKEN"], "exclusions": [] }] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::core::constants;
use crate::core::detect::Platform;
use crate::core::snapshot::EnvSnapshot;
use crate::error::{ConfigError, Result};

/// `bwsconfig.json` as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

/// One project as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEntry {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub platform: String,
    /// Environment name to vault scope id.
    #[serde(default, alias = "bwsProjectIds")]
    pub vault_project_ids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preserve_vars: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
}

impl ProjectEntry {
    fn merge_key(&self) -> (String, String) {
        (
            self.platform.trim().to_ascii_lowercase(),
            self.project_name.trim().to_string(),
        )
    }
}

/// A validated project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub platform: Platform,
    /// Environment name to vault scope id.
    pub scopes: BTreeMap<String, String>,
    pub preserve: BTreeSet<String>,
    pub exclusions: BTreeSet<String>,
}

impl Project {
    /// Scope id configured for exactly this environment.
    pub fn scope_for(&self, environment: &str) -> Option<&str> {
        self.scopes
            .get(environment)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }

    /// Scope id for an environment, falling back to the first configured one.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoScopes` if the project has no scope ids.
    pub fn scope_with_fallback(&self, environment: &str) -> Result<&str> {
        if let Some(id) = self.scope_for(environment) {
            return Ok(id);
        }
        let (env, id) = self
            .scopes
            .iter()
            .find(|(_, id)| !id.trim().is_empty())
            .ok_or_else(|| ConfigError::NoScopes(self.name.clone()))?;
        info!(
            project = %self.name,
            requested = environment,
            using = %env,
            "no scope for environment, using first available"
        );
        Ok(id)
    }

    /// Distinct scope ids in environment order.
    pub fn scope_ids(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.scopes
            .values()
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty() && seen.insert(*id))
            .collect()
    }

    /// Configured environment names.
    pub fn environments(&self) -> Vec<&str> {
        self.scopes.keys().map(String::as_str).collect()
    }

    /// Keys reconciliation must never delete.
    pub fn is_protected(&self, key: &str) -> bool {
        constants::ALWAYS_PROTECTED.contains(&key)
            || self.preserve.contains(key)
            || self.exclusions.contains(key)
    }

    /// Keys reconciliation must never create.
    pub fn is_withheld(&self, key: &str) -> bool {
        self.preserve.contains(key) || self.exclusions.contains(key)
    }

    fn from_entry(entry: &ProjectEntry) -> Result<Self> {
        let name = entry.project_name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "projectName",
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        let platform: Platform =
            entry
                .platform
                .parse()
                .map_err(|_| ConfigError::UnknownPlatform {
                    project: name.to_string(),
                    platform: entry.platform.clone(),
                })?;

        let scopes: BTreeMap<String, String> = entry
            .vault_project_ids
            .iter()
            .filter(|(_, id)| !id.trim().is_empty())
            .map(|(env, id)| (env.trim().to_ascii_lowercase(), id.trim().to_string()))
            .collect();
        if scopes.is_empty() {
            return Err(ConfigError::NoScopes(name.to_string()).into());
        }

        Ok(Self {
            name: name.to_string(),
            platform,
            scopes,
            preserve: entry.preserve_vars.iter().cloned().collect(),
            exclusions: entry.exclusions.iter().cloned().collect(),
        })
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub projects: Vec<Project>,
}

impl Config {
    /// Find the configuration file.
    ///
    /// `BWS_CONFIG_PATH` wins; otherwise the standard locations under `dir`
    /// are tried in order.
    pub fn locate(dir: &Path, snapshot: &EnvSnapshot) -> Option<PathBuf> {
        if let Some(explicit) = snapshot.non_empty(constants::CONFIG_PATH_VAR) {
            let path = dir.join(explicit);
            return path.is_file().then_some(path);
        }
        constants::CONFIG_SEARCH_PATHS
            .iter()
            .map(|rel| dir.join(rel))
            .find(|p| p.is_file())
    }

    /// Locate and load the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if no file exists, or a parse or
    /// validation error.
    pub fn load(dir: &Path, snapshot: &EnvSnapshot) -> Result<Self> {
        let path = Self::locate(dir, snapshot).ok_or_else(|| ConfigError::NotFound {
            searched: snapshot
                .non_empty(constants::CONFIG_PATH_VAR)
                .map(|p| vec![p])
                .unwrap_or_else(|| constants::CONFIG_SEARCH_PATHS.to_vec())
                .join(", "),
        })?;
        Self::load_from(&path)
    }

    /// Load a specific configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFile`, `ConfigError::Parse` or a validation
    /// error.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let file = read_file(path)?;
        let config = Self::from_file(path.to_path_buf(), &file)?;
        debug!(projects = config.projects.len(), "config loaded");
        Ok(config)
    }

    /// Validate a parsed file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for the first invalid project or a duplicate
    /// (platform, name) pair.
    pub fn from_file(path: PathBuf, file: &ConfigFile) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut projects = Vec::with_capacity(file.projects.len());

        for entry in &file.projects {
            let project = Project::from_entry(entry)?;
            if !seen.insert((project.platform, project.name.clone())) {
                return Err(ConfigError::InvalidValue {
                    field: "projects",
                    reason: format!(
                        "duplicate project '{}' for {}",
                        project.name, project.platform
                    ),
                }
                .into());
            }
            projects.push(project);
        }

        Ok(Self { path, projects })
    }

    /// Project by name.
    pub fn find(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Project by name, preferring the entry deployed to `platform`.
    ///
    /// The same name may be configured once per platform. Without a match on
    /// the platform the first entry of that name is returned so a mismatch
    /// can still be reported.
    pub fn find_on(&self, platform: Option<Platform>, name: &str) -> Option<&Project> {
        platform
            .and_then(|platform| {
                self.projects
                    .iter()
                    .find(|p| p.platform == platform && p.name == name)
            })
            .or_else(|| self.find(name))
    }

    /// Projects deployed to a platform.
    pub fn for_platform(&self, platform: Platform) -> Vec<&Project> {
        self.projects
            .iter()
            .filter(|p| p.platform == platform)
            .collect()
    }

    /// Union of environment names across projects, in first-seen order.
    pub fn environments(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for project in &self.projects {
            for env in project.environments() {
                if seen.insert(env.to_string()) {
                    out.push(env.to_string());
                }
            }
        }
        out
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let file = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file)
}

/// Merge `overlay` into `base`.
///
/// Projects are matched on (platform, name). Matching projects get their
/// scope maps unioned with overlay values winning, and their preserve and
/// exclusion lists unioned. Unmatched overlay projects are appended.
pub fn merge(base: &mut ConfigFile, overlay: ConfigFile) {
    for incoming in overlay.projects {
        let key = incoming.merge_key();
        match base.projects.iter_mut().find(|p| p.merge_key() == key) {
            Some(existing) => {
                existing.vault_project_ids.extend(incoming.vault_project_ids);
                for var in incoming.preserve_vars {
                    if !existing.preserve_vars.contains(&var) {
                        existing.preserve_vars.push(var);
                    }
                }
                for var in incoming.exclusions {
                    if !existing.exclusions.contains(&var) {
                        existing.exclusions.push(var);
                    }
                }
            }
            None => base.projects.push(incoming),
        }
    }
}

/// Whether the remote overlay was refreshed recently enough to skip.
pub fn overlay_is_fresh(dir: &Path) -> bool {
    let marker = dir.join(constants::CONFIG_CACHE_FILE);
    std::fs::metadata(marker)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < constants::CONFIG_CACHE_TTL)
}

/// Apply remote configuration documents to the local file.
///
/// `documents` are `(secret key, JSON text)` pairs. Unparseable documents
/// are skipped with a warning. The merged result is written to `target`
/// and the cache marker is refreshed. Returns how many documents applied.
///
/// # Errors
///
/// Returns an error if the existing file cannot be parsed or the merged
/// file cannot be written.
pub fn apply_overlay(dir: &Path, target: &Path, documents: &[(String, String)]) -> Result<usize> {
    let mut base = if target.is_file() {
        read_file(target)?
    } else {
        ConfigFile::default()
    };

    let mut applied = 0;
    for (key, text) in documents {
        match serde_json::from_str::<ConfigFile>(text) {
            Ok(doc) => {
                debug!(key = %key, projects = doc.projects.len(), "merging remote config");
                merge(&mut base, doc);
                applied += 1;
            }
            Err(e) => warn!(key = %key, error = %e, "skipping unparseable remote config"),
        }
    }

    if applied > 0 {
        // Validate before overwriting so a bad overlay cannot break the local file.
        Config::from_file(target.to_path_buf(), &base)?;
        let json = serde_json::to_string_pretty(&base).map_err(|source| ConfigError::Parse {
            path: target.to_path_buf(),
            source,
        })?;
        std::fs::write(target, format!("{}\n", json))?;
        info!(path = %target.display(), applied, "applied remote configuration");
    }

    std::fs::write(dir.join(constants::CONFIG_CACHE_FILE), b"")?;
    Ok(applied)
}
