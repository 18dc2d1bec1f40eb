//! Push local `.env.bws.<scope-id>` files into the vault.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::constants::{CLEAR_PAUSE, UPLOAD_EXCLUDED, UPLOAD_PREFIX};
use crate::core::env::Dotenv;
use crate::core::validation;
use crate::core::vault::{clean_message, SecretSource};
use crate::error::{ConfigError, Error, Result, VaultError};

/// An upload source file and the scope it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub scope_id: String,
    pub path: PathBuf,
}

impl UploadFile {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Find upload files in `dir`, sorted by name.
///
/// # Errors
///
/// Returns `ConfigError::InvalidScopeId` for a file whose suffix is not a
/// scope id, and `ConfigError::NoUploadFiles` when there are none.
pub fn discover(dir: &Path) -> Result<Vec<UploadFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(scope_id) = name.strip_prefix(UPLOAD_PREFIX) else {
            continue;
        };
        validation::validate_scope_id(&name, scope_id)?;
        files.push(UploadFile {
            scope_id: scope_id.to_string(),
            path: entry.path(),
        });
    }
    if files.is_empty() {
        return Err(ConfigError::NoUploadFiles(dir.display().to_string()).into());
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Secrets parsed from one upload file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub entries: Vec<(String, String)>,
    /// Keys whose value is empty or references an unknown variable.
    pub empty: Vec<String>,
    /// Sensitive keys left out of the upload.
    pub skipped: Vec<String>,
}

/// Parse one upload file.
///
/// `${VAR}` references resolve against earlier keys of the same file.
///
/// # Errors
///
/// Returns `ConfigError::ReadFile` if the file cannot be read.
pub fn load(file: &UploadFile) -> Result<Payload> {
    let mut dotenv = Dotenv::load(&file.path)?;
    let unresolved = dotenv.interpolate();
    for name in &unresolved {
        warn!(file = %file.name(), reference = %name, "unresolved variable reference");
    }

    let mut payload = Payload::default();
    for (key, value) in dotenv.entries() {
        if UPLOAD_EXCLUDED.contains(&key.as_str()) {
            payload.skipped.push(key.clone());
            continue;
        }
        if value.trim().is_empty() {
            warn!(file = %file.name(), key = %key, "empty value");
            payload.empty.push(key.clone());
        }
        payload.entries.push((key.clone(), value.clone()));
    }
    Ok(payload)
}

/// Result of uploading one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file: UploadFile,
    pub uploaded: Vec<String>,
    /// `(key, reason)` for each secret that could not be created.
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub empty: Vec<String>,
    /// Secrets deleted first, when clearing.
    pub cleared: Option<usize>,
}

impl FileReport {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Uploads files through a [`SecretSource`].
pub struct Uploader<'a> {
    vault: &'a dyn SecretSource,
    clear: bool,
    pause: Duration,
}

impl<'a> Uploader<'a> {
    pub fn new(vault: &'a dyn SecretSource) -> Self {
        Self {
            vault,
            clear: false,
            pause: CLEAR_PAUSE,
        }
    }

    /// Delete each scope's existing secrets before uploading.
    pub fn with_clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// Pause between clearing a scope and uploading into it.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Upload every file, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns an error only when a file cannot be read or a scope cannot be
    /// cleared; per-secret failures are recorded in the reports.
    pub async fn upload_all(&self, files: &[UploadFile]) -> Result<Vec<FileReport>> {
        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            reports.push(self.upload(file).await?);
        }
        Ok(reports)
    }

    /// Upload one file.
    ///
    /// # Errors
    ///
    /// See [`Uploader::upload_all`].
    pub async fn upload(&self, file: &UploadFile) -> Result<FileReport> {
        let payload = load(file)?;
        info!(file = %file.name(), scope = %file.scope_id, count = payload.entries.len(), "uploading");

        let cleared = if self.clear {
            let removed = self.clear_scope(&file.scope_id).await?;
            if removed > 0 && !self.pause.is_zero() {
                debug!(seconds = self.pause.as_secs(), "pausing before upload");
                tokio::time::sleep(self.pause).await;
            }
            Some(removed)
        } else {
            None
        };

        let mut report = FileReport {
            file: file.clone(),
            uploaded: Vec::new(),
            failed: Vec::new(),
            skipped: payload.skipped,
            empty: payload.empty,
            cleared,
        };
        for (key, value) in &payload.entries {
            match self.vault.create(&file.scope_id, key, value).await {
                Ok(_) => report.uploaded.push(key.clone()),
                Err(e) => {
                    warn!(scope = %file.scope_id, key = %key, error = %e, "upload failed");
                    report.failed.push((key.clone(), clean_message(&e.to_string())));
                }
            }
        }
        Ok(report)
    }

    /// Delete every secret in a scope. A scope the vault does not know
    /// counts as already empty.
    async fn clear_scope(&self, scope_id: &str) -> Result<usize> {
        let existing = match self.vault.list_scope(scope_id).await {
            Ok(list) => list,
            Err(Error::Vault(VaultError::Status { status: 404, .. })) => {
                info!(scope = %scope_id, "scope is empty, nothing to clear");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for secret in &existing {
            match self.vault.delete(&secret.id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(scope = %scope_id, key = %secret.key, error = %e, "could not delete secret"),
            }
        }
        info!(scope = %scope_id, removed, of = existing.len(), "cleared scope");
        Ok(removed)
    }
}

/// Fail when any file had a failed secret.
///
/// # Errors
///
/// Returns `VaultError::UploadFailed` with the failed file count.
pub fn check(reports: &[FileReport]) -> Result<()> {
    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        return Err(VaultError::UploadFailed {
            failed,
            total: reports.len(),
        }
        .into());
    }
    Ok(())
}
