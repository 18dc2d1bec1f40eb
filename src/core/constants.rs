//! Constants used throughout secure-run.
//!
//! Centralizes file names, environment variable names and tuning values.

use std::time::Duration;

/// Static project configuration file name.
pub const CONFIG_FILE: &str = "bwsconfig.json";

/// Alternative locations searched for the configuration file, in order.
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "bwsconfig.json",
    "scripts/bws-secure/bwsconfig.json",
    "scripts/bwsconfig.json",
];

/// Marker file whose age gates the remote configuration refresh.
pub const CONFIG_CACHE_FILE: &str = ".bwsconfig.cache";

/// How long a remote configuration refresh stays fresh.
pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Vault secrets with this key prefix carry JSON configuration.
pub const REMOTE_CONFIG_PREFIX: &str = "_bwsconfig_json";

/// Local environment file holding the selection block.
pub const ENV_FILE: &str = ".env";

/// Generated report of required variable names.
pub const REQUIRED_VARS_FILE: &str = "requiredVars.env";

/// Build tool configuration with an environment allowlist.
pub const TURBO_FILE: &str = "turbo.json";

/// Prefix of every secure bundle file.
pub const BUNDLE_PREFIX: &str = ".env.secure";

/// Prefix of upload source files (`.env.bws.<scope-id>`).
pub const UPLOAD_PREFIX: &str = ".env.bws.";

/// Selection block markers.
pub const BLOCK_BEGIN: &str = "# === BEGIN BWS PROJECT CONFIGURATION ===";
pub const BLOCK_END: &str = "# === END BWS PROJECT CONFIGURATION ===";

// Environment variable names.
pub const TOKEN_VAR: &str = "BWS_ACCESS_TOKEN";
pub const PROJECT_VAR: &str = "BWS_PROJECT";
pub const ENVIRONMENT_VAR: &str = "BWS_ENV";
pub const SCOPE_ID_VAR: &str = "BWS_PROJECT_ID";
pub const EPHEMERAL_KEY_VAR: &str = "BWS_EPHEMERAL_KEY";
pub const NESTED_GUARD_VAR: &str = "BWS_SECURE_RUN_ACTIVE";
pub const API_URL_VAR: &str = "BWS_API_URL";
pub const ORG_ID_VAR: &str = "BWS_ORG_ID";
pub const NO_OVERRIDE_VAR: &str = "BWS_NO_OVERRIDE";
pub const SUPPRESS_VAR: &str = "BWS_SUPPRESS_ALL";
pub const CONFIG_PATH_VAR: &str = "BWS_CONFIG_PATH";
pub const DEBUG_VAR: &str = "DEBUG";
pub const REVEAL_VAR: &str = "SHOW_DECRYPTED";
pub const SITE_NAME_VAR: &str = "SITE_NAME";
pub const LOG_FILTER_VAR: &str = "SECURE_RUN_LOG";

/// Control variables whose presence proves secrets were loaded.
pub const CONTROL_TEST_VARS: &[&str] = &["BWS_TEST_VAR", "BWS_SECRET_TEST_VAR"];

/// Keys no reconciliation may ever delete.
pub const ALWAYS_PROTECTED: &[&str] = &[TOKEN_VAR, SITE_NAME_VAR, PROJECT_VAR, ENVIRONMENT_VAR];

/// Platform tokens copied from the vault into the global bundle.
pub const PLATFORM_TOKEN_VARS: &[&str] = &["NETLIFY_AUTH_TOKEN", "VERCEL_AUTH_TOKEN"];

/// Keys never pushed to the vault by an upload.
pub const UPLOAD_EXCLUDED: &[&str] = &[TOKEN_VAR];

/// Pause between clearing a scope and uploading into it.
pub const CLEAR_PAUSE: Duration = Duration::from_secs(15);

/// Default vault endpoint.
pub const DEFAULT_VAULT_URL: &str = "https://api.bitwarden.com";

/// Where machine account tokens are managed.
pub fn machine_accounts_url(org_id: Option<&str>) -> String {
    match org_id {
        Some(id) => format!("https://vault.bitwarden.com/#/sm/{}/machine-accounts", id),
        None => "set BWS_ORG_ID to get a direct link to your machine accounts".to_string(),
    }
}

/// Bundle file name for a vault scope.
pub fn bundle_file(scope_id: &str) -> String {
    format!("{}.{}", BUNDLE_PREFIX, scope_id)
}
