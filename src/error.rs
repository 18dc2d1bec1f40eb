//! Error types for secure-run.
//!
//! Errors are grouped by the failure class they represent. `main` uses the
//! class to decide between a one-line diagnostic and a bordered block.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Static configuration and control variable errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("bwsconfig.json not found (searched: {searched})")]
    NotFound { searched: String },

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown platform '{platform}' for project '{project}'")]
    UnknownPlatform { project: String, platform: String },

    #[error("project '{0}' has no vault scope ids")]
    NoScopes(String),

    #[error("project '{0}' is not configured in bwsconfig.json")]
    ProjectNotFound(String),

    #[error("control variable missing: BWS_TEST_VAR or BWS_SECRET_TEST_VAR must be set")]
    MissingControlVariable,

    #[error("invalid scope id '{id}' in {file}")]
    InvalidScopeId { file: String, id: String },

    #[error("no .env.bws.<scope-id> files found in {0}")]
    NoUploadFiles(String),

    #[error("invalid ephemeral key: {0}")]
    InvalidEphemeralKey(String),
}

/// Vault and platform credential errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("BWS_ACCESS_TOKEN is not set")]
    MissingToken,

    #[error("BWS_ACCESS_TOKEN is invalid: {0}")]
    InvalidToken(String),

    #[error("{platform} auth token missing (set {var})")]
    MissingPlatformToken {
        platform: &'static str,
        var: &'static str,
    },

    #[error("{platform} rejected the auth token: {reason}")]
    PlatformTokenRejected {
        platform: &'static str,
        reason: String,
    },
}

/// Retry budget exhausted while rate limited.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limited during {operation} after {attempts} attempts: {message}")]
    Exhausted {
        operation: String,
        attempts: u32,
        message: String,
    },
}

/// Platform reconciliation errors. All of them abort the run.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{platform}: failed to delete {}", keys.join(", "))]
    DeleteFailed {
        platform: &'static str,
        keys: Vec<String>,
    },

    #[error("{platform}: failed to create {}", keys.join(", "))]
    CreateFailed {
        platform: &'static str,
        keys: Vec<String>,
    },

    #[error("{platform}: no target named '{name}'")]
    TargetNotFound { platform: &'static str, name: String },

    #[error("{platform}: {message}")]
    Request {
        platform: &'static str,
        message: String,
    },

    #[error("no secrets loaded for project '{0}'")]
    NoSecrets(String),

    #[error("SITE_NAME must be set for platform deployments")]
    MissingSiteName,

    #[error("project '{project}' is configured for {configured}, not {detected}")]
    PlatformMismatch {
        project: String,
        configured: String,
        detected: &'static str,
    },
}

/// Secure bundle storage and integrity errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("integrity check failed: wrong key or tampered bundle")]
    Integrity,

    #[error("malformed bundle: {0}")]
    Malformed(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Vault transport errors.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("vault request failed: {0}")]
    Request(String),

    #[error("vault responded {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected vault response: {0}")]
    Decode(String),

    #[error("{failed} of {total} upload file(s) failed")]
    UploadFailed { failed: usize, total: usize },
}

/// Variable discovery errors.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to write {path}: {source}")]
    WriteReport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse turbo.json: {0}")]
    Turbo(String),
}

/// Project and environment resolution errors.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no projects configured in bwsconfig.json")]
    NoProjects,

    #[error("running on {platform} and neither SITE_NAME nor BWS_PROJECT is set")]
    Ambiguous { platform: &'static str },

    #[error("SITE_NAME '{0}' does not match any configured project")]
    UnknownSite(String),

    #[error("multiple projects configured and no terminal to prompt; set BWS_PROJECT")]
    NotInteractive,

    #[error("project selection failed: {0}")]
    Prompt(String),
}

impl Error {
    /// Whether this error belongs to a class that gets a bordered block.
    pub fn is_prominent(&self) -> bool {
        matches!(
            self,
            Error::Reconcile(_)
                | Error::Auth(AuthError::MissingToken)
                | Error::Auth(AuthError::InvalidToken(_))
                | Error::Config(ConfigError::MissingControlVariable)
        )
    }

    /// Short remediation hint shown under the error line.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Config(ConfigError::NotFound { .. }) => {
                Some("create bwsconfig.json or set BWS_CONFIG_PATH")
            }
            Error::Resolve(ResolveError::Ambiguous { .. }) => {
                Some("set SITE_NAME or BWS_PROJECT in the platform settings")
            }
            Error::Resolve(ResolveError::NotInteractive) => Some("set BWS_PROJECT=<name>"),
            Error::Config(ConfigError::MissingControlVariable) => {
                Some("add BWS_TEST_VAR to the active vault scope")
            }
            Error::Config(ConfigError::InvalidScopeId { .. }) => {
                Some("name upload files .env.bws.<scope-id>, e.g. .env.bws.12345678-1234-1234-1234-123456789abc")
            }
            Error::Auth(AuthError::MissingToken) => Some("export BWS_ACCESS_TOKEN or add it to .env"),
            Error::Auth(AuthError::MissingPlatformToken { .. }) => {
                Some("store the platform token in the vault or the build environment")
            }
            Error::RateLimit(_) => Some("wait a minute and re-run; reconciliation is idempotent"),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(e: reqwest::Error) -> Self {
        VaultError::Request(e.without_url().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
