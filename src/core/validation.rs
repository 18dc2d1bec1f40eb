//! Input validation for secret keys and vault scope ids.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ConfigError, Result};

static SCOPE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid regex")
});

/// Validate a secret key name.
///
/// Secret keys must be valid environment variable names:
/// - Only A-Z, a-z, 0-9, and underscore
/// - Cannot start with a digit
/// - Cannot be empty
///
/// # Arguments
///
/// * `key` - The key name to validate
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if the key is invalid.
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("key cannot be empty".to_string())
    } else if key.starts_with(|c: char| c.is_ascii_digit()) {
        Some(format!("'{}' cannot start with a digit", key))
    } else {
        key.chars()
            .enumerate()
            .find(|(_, ch)| !ch.is_ascii_alphanumeric() && *ch != '_')
            .map(|(i, ch)| {
                format!(
                    "'{}' has invalid character '{}' at position {}",
                    key,
                    ch,
                    i + 1
                )
            })
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidValue {
            field: "secret key",
            reason,
        }
        .into()),
        None => Ok(()),
    }
}

/// Whether a string is a vault scope id (a UUID).
pub fn is_scope_id(id: &str) -> bool {
    SCOPE_ID.is_match(id)
}

/// Validate the scope id suffix of an upload file name.
///
/// # Errors
///
/// Returns `ConfigError::InvalidScopeId` when `id` is not a UUID.
pub fn validate_scope_id(file: &str, id: &str) -> Result<()> {
    if is_scope_id(id) {
        Ok(())
    } else {
        Err(ConfigError::InvalidScopeId {
            file: file.to_string(),
            id: id.to_string(),
        }
        .into())
    }
}

/// Validate file permissions (Unix only).
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if permissions don't match.
#[cfg(unix)]
pub fn validate_file_permissions(path: &std::path::Path, expected_mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)?;
    let actual_mode = metadata.permissions().mode() & 0o777;

    if actual_mode != expected_mode {
        return Err(ConfigError::InvalidValue {
            field: "file permissions",
            reason: format!(
                "{} has mode {:o}, expected {:o}",
                path.display(),
                actual_mode,
                expected_mode
            ),
        }
        .into());
    }

    Ok(())
}
