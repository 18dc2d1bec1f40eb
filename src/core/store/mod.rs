//! Encrypted secret bundles on disk.
//!
//! One bundle per vault scope (`.env.secure.<scope>`) plus a global bundle
//! (`.env.secure`) for platform tokens. Plaintext is `KEY=value` lines and is
//! only ever held in memory; files are written owner-only on unix.

mod cleanup;

pub use cleanup::{remove_bundles, CleanupGuard};

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::cipher::{self, EphemeralKey};
use crate::core::constants;
use crate::core::env;
use crate::error::{Result, StoreError};

/// Which bundle to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleId<'a> {
    /// Platform tokens collected from every visible secret.
    Global,
    /// Secrets for one vault scope.
    Scope(&'a str),
}

impl BundleId<'_> {
    fn file_name(&self) -> String {
        match self {
            BundleId::Global => constants::BUNDLE_PREFIX.to_string(),
            BundleId::Scope(id) => constants::bundle_file(id),
        }
    }
}

/// Whether a file name belongs to a secure bundle.
pub fn is_bundle_name(name: &str) -> bool {
    name == constants::BUNDLE_PREFIX
        || name
            .strip_prefix(constants::BUNDLE_PREFIX)
            .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
}

/// Bundle reader/writer bound to a directory and a run's key.
#[derive(Debug)]
pub struct SecureStore {
    dir: PathBuf,
    key: EphemeralKey,
}

impl SecureStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, key: EphemeralKey) -> Self {
        Self {
            dir: dir.into(),
            key,
        }
    }

    /// The run's key.
    pub fn key(&self) -> &EphemeralKey {
        &self.key
    }

    /// Directory bundles are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a bundle file.
    pub fn path(&self, id: BundleId<'_>) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// Encrypt `secrets` and write them as a bundle.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Write` if the file cannot be written.
    pub fn write(&self, id: BundleId<'_>, secrets: &BTreeMap<String, String>) -> Result<PathBuf> {
        let plaintext = zeroize::Zeroizing::new(env::to_multiline(secrets));
        let bundle = cipher::encrypt(&plaintext, &self.key)?;
        let path = self.path(id);

        write_private(&path, bundle.as_bytes())?;
        debug!(path = %path.display(), count = secrets.len(), "wrote secure bundle");
        Ok(path)
    }

    /// Read and decrypt a bundle. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Read` for I/O failures and `StoreError::Integrity`
    /// when the bundle does not authenticate under this run's key.
    pub fn read(&self, id: BundleId<'_>) -> Result<Option<BTreeMap<String, String>>> {
        let path = self.path(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }.into()),
        };

        let plaintext = cipher::decrypt(&text, &self.key)?;
        Ok(Some(env::parse_multiline(&plaintext)))
    }

    /// Bundle files currently present in the directory.
    pub fn list(&self) -> Vec<PathBuf> {
        list_bundles(&self.dir)
    }
}

pub(crate) fn list_bundles(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_bundle_name))
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}

/// Write a file readable only by the owner.
pub(crate) fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    let map_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .mode(0o600)
            .open(path)
            .map_err(map_err)?;
        file.write_all(content).map_err(map_err)?;
        file.flush().map_err(map_err)?;

        // Ensure secure permissions even when overwriting an existing file.
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(map_err)?;
    }

    #[cfg(not(unix))]
    {
        let mut file = std::fs::File::create(path).map_err(map_err)?;
        file.write_all(content).map_err(map_err)?;
    }

    Ok(())
}
