//! Netlify site environment variables.
//!
//! Variables live on the account and are filtered by `site_id`. One
//! variable carries a value per deploy context; a value in the `all`
//! context applies to every context.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{is_not_found, send, Context, Pacing, PlatformError, Reconciler, Target};
use crate::core::detect::Platform;
use crate::core::plan::{ContextValues, RemoteVar, Removal, Upsert};

const CONTEXTS: &[Context] = &[
    Context {
        name: "production",
        environment: "prod",
    },
    Context {
        name: "deploy-preview",
        environment: "dev",
    },
    Context {
        name: "branch-deploy",
        environment: "dev",
    },
];

const SCOPES: [&str; 3] = ["builds", "functions", "runtime"];

#[derive(Debug, Deserialize)]
struct Site {
    id: String,
    #[serde(default)]
    site_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    custom_domain: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl Site {
    fn host(&self) -> Option<&str> {
        let url = self.url.as_deref()?;
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        rest.split('/').next()
    }

    /// Leftmost host label, the site's subdomain.
    fn subdomain(&self) -> Option<&str> {
        self.host().and_then(|h| h.split('.').next())
    }
}

#[derive(Debug, Deserialize)]
struct EnvVar {
    key: String,
    #[serde(default)]
    values: Vec<EnvValue>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvValue {
    context: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnvPayload<'a> {
    key: &'a str,
    scopes: [&'static str; 3],
    values: Vec<EnvValue>,
    is_secret: bool,
}

impl<'a> EnvPayload<'a> {
    fn new(key: &'a str, values: &ContextValues) -> Self {
        Self {
            key,
            scopes: SCOPES,
            values: values
                .iter()
                .map(|(context, value)| EnvValue {
                    context: context.clone(),
                    value: Some(value.clone()),
                })
                .collect(),
            is_secret: false,
        }
    }
}

/// Netlify reconciler.
pub struct Netlify {
    base_url: String,
    token: String,
    http: reqwest::Client,
    pacing: Pacing,
}

impl Netlify {
    /// POST accepts at most this many variables per call.
    pub const MAX_CREATE: usize = 20;

    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
            pacing: Pacing {
                delete_batch: 5,
                upsert_batch: Self::MAX_CREATE,
                pause_min: Duration::from_secs(1),
                pause_max: Duration::from_secs(1),
            },
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn env_url(&self, target: &Target, key: Option<&str>) -> Result<String, PlatformError> {
        let account = target
            .account
            .as_deref()
            .ok_or_else(|| PlatformError::Decode(format!("site '{}' has no account id", target.name)))?;
        Ok(match key {
            Some(key) => self.url(&format!("accounts/{}/env/{}", account, key)),
            None => self.url(&format!("accounts/{}/env", account)),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str, target: &Target) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .query(&[("site_id", target.id.as_str())])
    }
}

#[async_trait]
impl Reconciler for Netlify {
    fn platform(&self) -> Platform {
        Platform::Netlify
    }

    fn contexts(&self) -> &'static [Context] {
        CONTEXTS
    }

    fn pacing(&self) -> Pacing {
        self.pacing
    }

    async fn locate(&self, name: &str) -> Result<Target, PlatformError> {
        let response = send(
            self.http
                .get(self.url("sites"))
                .bearer_auth(&self.token)
                .query(&[("filter", "all")]),
        )
        .await?;
        let sites: Vec<Site> = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.without_url().to_string()))?;

        let site = sites
            .iter()
            .find(|s| s.name == name)
            .or_else(|| {
                sites.iter().find(|s| {
                    s.site_id.as_deref() == Some(name)
                        || s.custom_domain.as_deref() == Some(name)
                        || s.host() == Some(name)
                        || s.subdomain() == Some(name)
                })
            })
            .ok_or_else(|| PlatformError::NotFound(name.to_string()))?;

        debug!(site = %site.id, name = %site.name, "found Netlify site");
        Ok(Target {
            id: site.id.clone(),
            name: site.name.clone(),
            account: site.account_id.clone(),
        })
    }

    async fn enumerate(&self, target: &Target) -> Result<Vec<RemoteVar>, PlatformError> {
        let url = self.env_url(target, None)?;
        let response = match send(self.request(reqwest::Method::GET, &url, target)).await {
            Ok(r) => r,
            Err(e) if is_not_found(&e) => {
                debug!(site = %target.id, "no environment configured");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let vars: Vec<EnvVar> = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.without_url().to_string()))?;

        Ok(vars.into_iter().map(to_remote).collect())
    }

    async fn remove(&self, target: &Target, removal: &Removal) -> Result<(), PlatformError> {
        let key = removal.key();
        let url = self.env_url(target, Some(key))?;
        let retained = removal.retained();
        if !retained.is_empty() {
            let payload = EnvPayload::new(key, &retained);
            send(self.request(reqwest::Method::PUT, &url, target).json(&payload)).await?;
            debug!(key = %key, kept = retained.len(), "cleared managed contexts");
            return Ok(());
        }
        match send(self.request(reqwest::Method::DELETE, &url, target)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(key = %key, "already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, target: &Target, batch: &[Upsert]) -> Result<(), PlatformError> {
        let (existing, new): (Vec<&Upsert>, Vec<&Upsert>) =
            batch.iter().partition(|u| u.existing.is_some());

        for chunk in new.chunks(Self::MAX_CREATE) {
            let payload: Vec<EnvPayload<'_>> =
                chunk.iter().map(|u| EnvPayload::new(&u.key, &u.values)).collect();
            let url = self.env_url(target, None)?;
            send(self.request(reqwest::Method::POST, &url, target).json(&payload)).await?;
            debug!(count = payload.len(), "created Netlify variables");
        }

        for upsert in existing {
            let url = self.env_url(target, Some(&upsert.key))?;
            let values = upsert.merged_values();
            let payload = EnvPayload::new(&upsert.key, &values);
            send(self.request(reqwest::Method::PUT, &url, target).json(&payload)).await?;
            debug!(key = %upsert.key, "updated Netlify variable");
        }
        Ok(())
    }
}

/// Expand `all` into the managed contexts; explicit contexts win.
fn to_remote(var: EnvVar) -> RemoteVar {
    let mut remote = RemoteVar::new(var.key);
    let mut explicit = Vec::new();
    for v in var.values {
        let Some(value) = v.value else { continue };
        if v.context == "all" {
            for ctx in CONTEXTS {
                remote.values.entry(ctx.name.to_string()).or_insert_with(|| value.clone());
            }
        } else {
            explicit.push((v.context, value));
        }
    }
    for (context, value) in explicit {
        remote.values.insert(context, value);
    }
    remote
}
