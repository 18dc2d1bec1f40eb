//! Deployment platform reconcilers.
//!
//! Each platform implements [`Reconciler`]: find the deploy target, list
//! its variables, remove one variable, upsert a batch. The shared driver
//! in [`apply`] plans and applies changes on top of that contract.

pub mod apply;
mod netlify;
mod vercel;

pub use apply::{reconcile, Outcome};
pub use netlify::Netlify;
pub use vercel::Vercel;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use thiserror::Error;

use crate::core::detect::Platform;
use crate::core::plan::{RemoteVar, Removal, Upsert};
use crate::core::retry::Retryable;
use crate::core::snapshot::EnvSnapshot;

/// A located deploy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub name: String,
    /// Netlify account id or Vercel team id.
    pub account: Option<String>,
}

/// A platform deploy context and the environment whose secrets feed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub name: &'static str,
    pub environment: &'static str,
}

/// Batch sizes and the pause between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub delete_batch: usize,
    pub upsert_batch: usize,
    pub pause_min: Duration,
    pub pause_max: Duration,
}

impl Pacing {
    /// No pause between batches.
    pub fn unpaced(delete_batch: usize, upsert_batch: usize) -> Self {
        Self {
            delete_batch,
            upsert_batch,
            pause_min: Duration::ZERO,
            pause_max: Duration::ZERO,
        }
    }

    /// Pause before the next batch, drawn uniformly from the range.
    pub fn pause(&self) -> Duration {
        if self.pause_max <= self.pause_min {
            return self.pause_min;
        }
        let lo = self.pause_min.as_millis() as u64;
        let hi = self.pause_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// A failed platform API call.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("no target named '{0}'")]
    NotFound(String),
}

impl PlatformError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PlatformError::Status { status: 401 | 403, .. })
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Transport(e.without_url().to_string())
    }
}

impl Retryable for PlatformError {
    fn is_transient(&self) -> bool {
        match self {
            PlatformError::Transport(_) => true,
            PlatformError::Status { status, .. } => *status == 429 || *status >= 500,
            PlatformError::Decode(_) | PlatformError::NotFound(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            PlatformError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Per-platform reconciliation primitives.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn platform(&self) -> Platform;

    /// Deploy contexts this reconciler manages.
    fn contexts(&self) -> &'static [Context];

    fn pacing(&self) -> Pacing;

    /// Find the deploy target called `name`.
    async fn locate(&self, name: &str) -> Result<Target, PlatformError>;

    /// Variables currently configured on the target.
    async fn enumerate(&self, target: &Target) -> Result<Vec<RemoteVar>, PlatformError>;

    /// Clear one variable from the removal's contexts, keeping its values
    /// elsewhere. An already absent variable is a success.
    async fn remove(&self, target: &Target, removal: &Removal) -> Result<(), PlatformError>;

    /// Create or update a batch of variables. Values of an existing key in
    /// contexts the upsert does not write are kept.
    async fn upsert(&self, target: &Target, batch: &[Upsert]) -> Result<(), PlatformError>;
}

/// Build the reconciler for `platform`, honouring API URL overrides.
pub fn reconciler_for(platform: Platform, snapshot: &EnvSnapshot, token: &str) -> Box<dyn Reconciler> {
    let base_url = platform.api_url(snapshot);
    match platform {
        Platform::Netlify => Box::new(Netlify::new(base_url, token)),
        Platform::Vercel => Box::new(Vercel::new(base_url, token)),
    }
}

/// Send a request, turning non-success statuses into [`PlatformError`].
pub(crate) async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, PlatformError> {
    let response = req.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Status {
        status: status.as_u16(),
        message: error_message(&body),
        retry_after,
    })
}

/// Pull a human message out of a platform error body.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
    });
    match message {
        Some(m) => m.to_string(),
        None => body.trim().chars().take(300).collect(),
    }
}

/// Whether a failed call means the resource is already gone.
pub(crate) fn is_not_found(err: &PlatformError) -> bool {
    matches!(err, PlatformError::Status { status: 404, .. })
}
