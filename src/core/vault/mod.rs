//! Remote secret vault.
//!
//! [`SecretSource`] is the seam the orchestrator and the upload command
//! talk to; [`HttpVault`] implements it over the vault's REST API.

mod http;

pub use http::HttpVault;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Longest diagnostic kept from a vault error.
pub const MAX_MESSAGE_LEN: usize = 1000;

/// A secret as returned by the vault.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Collapse a secret list into a key/value map. Later duplicates win.
pub fn to_map(secrets: Vec<Secret>) -> BTreeMap<String, String> {
    secrets.into_iter().map(|s| (s.key, s.value)).collect()
}

/// Outcome of checking the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Missing,
    Invalid(String),
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid)
    }
}

/// Source of vault secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Check that the access token is present and accepted.
    async fn validate(&self) -> TokenStatus;

    /// Every secret visible to the token.
    async fn list_all(&self) -> Result<Vec<Secret>>;

    /// Secrets in one scope.
    async fn list_scope(&self, scope_id: &str) -> Result<Vec<Secret>>;

    /// Create a secret in a scope.
    async fn create(&self, scope_id: &str, key: &str, value: &str) -> Result<Secret>;

    /// Delete a secret by id.
    async fn delete(&self, secret_id: &str) -> Result<()>;
}

/// Reduce a raw vault error to something readable.
///
/// Location, backtrace and "Run with" hint lines are dropped. An embedded
/// JSON payload with a `message` field replaces the whole text. The result
/// is capped at [`MAX_MESSAGE_LEN`] characters.
pub fn clean_message(raw: &str) -> String {
    let head: String = raw.trim().chars().take(MAX_MESSAGE_LEN).collect();

    if let Some(message) = embedded_message(&head) {
        return format!("Server responded with: \"{}\"", message);
    }

    head.lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.starts_with("Location:") || t.starts_with("Backtrace omitted") || t.starts_with("Run with"))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// `message` of the first JSON object embedded in `text`.
fn embedded_message(text: &str) -> Option<String> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut values =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<serde_json::Value>();
        match values.next()? {
            Ok(serde_json::Value::Object(obj)) => {
                obj.get("message").and_then(|m| m.as_str()).map(str::to_string)
            }
            _ => None,
        }
    })
}
