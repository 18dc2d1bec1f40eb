//! Vercel project environment variables.
//!
//! Vercel stores one row per (key, target set). Rows are read decrypted,
//! created in bulk through the upsert endpoint, and deleted by row id. A
//! row that also serves an unmanaged target is narrowed to that target
//! instead of deleted. A project may live in the personal account or in
//! any team the token can see.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{is_not_found, send, Context, Pacing, PlatformError, Reconciler, Target};
use crate::core::detect::Platform;
use crate::core::plan::{RemoteRow, RemoteVar, Removal, Upsert};

const CONTEXTS: &[Context] = &[
    Context {
        name: "production",
        environment: "prod",
    },
    Context {
        name: "preview",
        environment: "dev",
    },
    Context {
        name: "development",
        environment: "dev",
    },
];

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Teams {
    #[serde(default)]
    teams: Vec<Team>,
}

#[derive(Debug, Deserialize)]
struct Team {
    id: String,
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Deserialize)]
struct Envs {
    #[serde(default)]
    envs: Vec<EnvRow>,
}

#[derive(Debug, Deserialize)]
struct EnvRow {
    id: String,
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    target: Vec<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    decrypted: Option<bool>,
}

impl EnvRow {
    /// The plaintext value, when the API handed it out.
    fn readable_value(&self) -> Option<&str> {
        let sealed = matches!(self.kind.as_deref(), Some("sensitive") | Some("secret"));
        if sealed || self.decrypted == Some(false) {
            return None;
        }
        self.value.as_deref()
    }
}

#[derive(Debug, Serialize)]
struct EnvPayload<'a> {
    key: &'a str,
    value: &'a str,
    target: Vec<&'a str>,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct TargetPatch<'a> {
    target: &'a [String],
}

/// Group one key's context values into rows sharing a value.
fn rows(upsert: &Upsert) -> Vec<EnvPayload<'_>> {
    let mut by_value: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (context, value) in &upsert.values {
        by_value.entry(value.as_str()).or_default().push(context.as_str());
    }
    by_value
        .into_iter()
        .map(|(value, target)| EnvPayload {
            key: &upsert.key,
            value,
            target,
            kind: "encrypted",
        })
        .collect()
}

/// Vercel reconciler.
pub struct Vercel {
    base_url: String,
    token: String,
    http: reqwest::Client,
    pacing: Pacing,
}

impl Vercel {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
            pacing: Pacing {
                delete_batch: 10,
                upsert_batch: 10,
                pause_min: Duration::from_secs(1),
                pause_max: Duration::from_secs(15),
            },
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str, team: Option<&str>) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.token);
        match team {
            Some(team) => req.query(&[("teamId", team)]),
            None => req,
        }
    }

    async fn find_project(&self, name: &str, team: Option<&str>) -> Result<Option<Project>, PlatformError> {
        let path = format!("v9/projects/{}", name);
        match send(self.request(reqwest::Method::GET, &path, team)).await {
            Ok(response) => {
                let project = response
                    .json()
                    .await
                    .map_err(|e| PlatformError::Decode(e.without_url().to_string()))?;
                Ok(Some(project))
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_teams(&self) -> Result<Teams, PlatformError> {
        let response = send(self.request(reqwest::Method::GET, "v2/teams", None)).await?;
        response
            .json::<Teams>()
            .await
            .map_err(|e| PlatformError::Decode(e.without_url().to_string()))
    }

    /// Take `var` out of `contexts`: rows wholly inside are deleted, rows
    /// also serving other targets are narrowed, the rest are untouched.
    async fn clear(
        &self,
        target: &Target,
        var: &RemoteVar,
        contexts: &BTreeSet<String>,
    ) -> Result<(), PlatformError> {
        let changes = var.clear_rows(contexts);
        let team = target.account.as_deref();
        for row in changes.drop {
            let path = format!("v9/projects/{}/env/{}", target.id, row.id);
            match send(self.request(reqwest::Method::DELETE, &path, team)).await {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => debug!(key = %var.key, id = %row.id, "already absent"),
                Err(e) => return Err(e),
            }
        }
        for (row, keep) in changes.narrow {
            let path = format!("v9/projects/{}/env/{}", target.id, row.id);
            let patch = TargetPatch { target: &keep };
            match send(self.request(reqwest::Method::PATCH, &path, team).json(&patch)).await {
                Ok(_) => debug!(key = %var.key, id = %row.id, kept = ?keep, "narrowed row targets"),
                Err(e) if is_not_found(&e) => debug!(key = %var.key, id = %row.id, "already absent"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Teams visible to the token. Failure to list them is not fatal.
    async fn teams(&self) -> Vec<Team> {
        match self.list_teams().await {
            Ok(t) => t.teams,
            Err(e) => {
                debug!(error = %e, "could not list teams");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Reconciler for Vercel {
    fn platform(&self) -> Platform {
        Platform::Vercel
    }

    fn contexts(&self) -> &'static [Context] {
        CONTEXTS
    }

    fn pacing(&self) -> Pacing {
        self.pacing
    }

    async fn locate(&self, name: &str) -> Result<Target, PlatformError> {
        if let Some(project) = self.find_project(name, None).await? {
            debug!(project = %project.id, "found Vercel project in personal account");
            return Ok(Target {
                id: project.id,
                name: project.name,
                account: None,
            });
        }
        for team in self.teams().await {
            if let Some(project) = self.find_project(name, Some(&team.id)).await? {
                debug!(project = %project.id, team = %team.slug, "found Vercel project in team");
                return Ok(Target {
                    id: project.id,
                    name: project.name,
                    account: Some(team.id),
                });
            }
        }
        Err(PlatformError::NotFound(name.to_string()))
    }

    async fn enumerate(&self, target: &Target) -> Result<Vec<RemoteVar>, PlatformError> {
        let path = format!("v9/projects/{}/env", target.id);
        let response = send(
            self.request(reqwest::Method::GET, &path, target.account.as_deref())
                .query(&[("decrypt", "true")]),
        )
        .await?;
        let envs: Envs = response
            .json()
            .await
            .map_err(|e| PlatformError::Decode(e.without_url().to_string()))?;

        let mut by_key: BTreeMap<String, RemoteVar> = BTreeMap::new();
        for row in envs.envs {
            let value = row.readable_value().map(str::to_string);
            let var = by_key
                .entry(row.key.clone())
                .or_insert_with(|| RemoteVar::new(row.key.as_str()));
            if let Some(value) = value {
                for t in &row.target {
                    var.values.insert(t.clone(), value.clone());
                }
            }
            var.rows.push(RemoteRow {
                id: row.id,
                contexts: row.target.into_iter().collect(),
            });
        }
        Ok(by_key.into_values().collect())
    }

    async fn remove(&self, target: &Target, removal: &Removal) -> Result<(), PlatformError> {
        self.clear(target, &removal.var, &removal.contexts).await
    }

    /// Existing rows are cleared from the written targets first so a
    /// changed target grouping cannot collide with them.
    async fn upsert(&self, target: &Target, batch: &[Upsert]) -> Result<(), PlatformError> {
        for upsert in batch {
            if let Some(existing) = &upsert.existing {
                self.clear(target, existing, &upsert.contexts()).await?;
            }
        }
        let payload: Vec<EnvPayload<'_>> = batch.iter().flat_map(rows).collect();
        if payload.is_empty() {
            return Ok(());
        }
        let path = format!("v10/projects/{}/env", target.id);
        send(
            self.request(reqwest::Method::POST, &path, target.account.as_deref())
                .query(&[("upsert", "true")])
                .json(&payload),
        )
        .await?;
        debug!(rows = payload.len(), keys = batch.len(), "upserted Vercel variables");
        Ok(())
    }
}
