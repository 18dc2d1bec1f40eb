//! REST client for the vault.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{clean_message, Secret, SecretSource, TokenStatus};
use crate::core::constants::{API_URL_VAR, DEFAULT_VAULT_URL, TOKEN_VAR};
use crate::core::retry::{Exhausted, RetryPolicy, Retryable};
use crate::core::snapshot::EnvSnapshot;
use crate::error::{AuthError, Error, RateLimitError, Result, VaultError};

impl Retryable for VaultError {
    fn is_transient(&self) -> bool {
        match self {
            VaultError::Request(_) => true,
            VaultError::Status { status, .. } => *status == 429 || *status >= 500,
            VaultError::Decode(_) | VaultError::UploadFailed { .. } => false,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            VaultError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Responses come either as a bare array or wrapped in `data`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<Secret>),
    Wrapped { data: Vec<Secret> },
}

impl Listing {
    fn into_vec(self) -> Vec<Secret> {
        match self {
            Listing::Bare(v) | Listing::Wrapped { data: v } => v,
        }
    }
}

#[derive(Serialize)]
struct NewSecret<'a> {
    key: &'a str,
    value: &'a str,
}

/// Vault client over HTTPS.
pub struct HttpVault {
    base_url: String,
    token: Option<Zeroizing<String>>,
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpVault {
    /// Create a client for `base_url`.
    pub fn new(base_url: impl Into<String>, token: Option<&str>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token: token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Zeroizing::new(t.to_string())),
            http: reqwest::Client::new(),
            policy: RetryPolicy::vault(),
        }
    }

    /// Client configured from `BWS_API_URL` and `BWS_ACCESS_TOKEN`.
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        Self::new(
            snapshot.non_empty(API_URL_VAR).unwrap_or(DEFAULT_VAULT_URL),
            snapshot.non_empty(TOKEN_VAR),
        )
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shorten the wait after a rate-limited response.
    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.policy.rate_limit_delay = Some(delay);
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn attempt<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> std::result::Result<reqwest::Response, VaultError> {
        let token = self.token.as_ref().map(|t| t.as_str()).unwrap_or_default();
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(VaultError::Status {
            status: status.as_u16(),
            message: clean_message(&message),
        })
    }

    /// Send one request under the retry policy.
    async fn send<B: Serialize + Sync>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        if self.token.is_none() {
            return Err(AuthError::MissingToken.into());
        }
        let url = self.url(path);
        debug!(operation, url = %url, "vault request");
        self.policy
            .run(operation, || self.attempt(method.clone(), &url, body))
            .await
            .map_err(|e| escalate(operation, e))
    }

    async fn list(&self, operation: &str, path: &str) -> Result<Vec<Secret>> {
        let response = self.send::<()>(operation, Method::GET, path, None).await?;
        let listing: Listing = response
            .json()
            .await
            .map_err(|e| VaultError::Decode(e.without_url().to_string()))?;
        Ok(listing.into_vec())
    }
}

/// Turn a failed retry run into the crate error taxonomy.
fn escalate(operation: &str, exhausted: Exhausted<VaultError>) -> Error {
    let Exhausted {
        attempts,
        rate_limited,
        last,
    } = exhausted;

    if rate_limited {
        return RateLimitError::Exhausted {
            operation: operation.to_string(),
            attempts,
            message: clean_message(&last.to_string()),
        }
        .into();
    }
    match last {
        VaultError::Status { status, message } if status == 401 || status == 403 => {
            AuthError::InvalidToken(message).into()
        }
        other => other.into(),
    }
}

#[async_trait]
impl SecretSource for HttpVault {
    async fn validate(&self) -> TokenStatus {
        if self.token.is_none() {
            return TokenStatus::Missing;
        }
        match self.send::<()>("token validation", Method::GET, "projects", None).await {
            Ok(_) => TokenStatus::Valid,
            Err(Error::Auth(AuthError::InvalidToken(reason))) => TokenStatus::Invalid(reason),
            Err(e) => TokenStatus::Invalid(e.to_string()),
        }
    }

    async fn list_all(&self) -> Result<Vec<Secret>> {
        let secrets = self.list("list secrets", "secrets").await?;
        debug!(count = secrets.len(), "listed all visible secrets");
        Ok(secrets)
    }

    async fn list_scope(&self, scope_id: &str) -> Result<Vec<Secret>> {
        let path = format!("projects/{}/secrets", scope_id);
        let secrets = self.list("list scope secrets", &path).await?;
        info!(scope = %scope_id, count = secrets.len(), "fetched secrets");
        Ok(secrets)
    }

    async fn create(&self, scope_id: &str, key: &str, value: &str) -> Result<Secret> {
        let path = format!("projects/{}/secrets", scope_id);
        let body = NewSecret { key, value };
        let response = self
            .send("create secret", Method::POST, &path, Some(&body))
            .await?;
        let created: Secret = response
            .json()
            .await
            .map_err(|e| VaultError::Decode(e.without_url().to_string()))?;
        debug!(scope = %scope_id, key = %key, "created secret");
        Ok(created)
    }

    async fn delete(&self, secret_id: &str) -> Result<()> {
        let path = format!("secrets/{}", secret_id);
        match self.send::<()>("delete secret", Method::DELETE, &path, None).await {
            Ok(_) => Ok(()),
            Err(Error::Vault(VaultError::Status { status, .. }))
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                debug!(id = %secret_id, "secret already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
