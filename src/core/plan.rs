//! Reconciliation plans.
//!
//! A plan compares the desired variables for a project against what a
//! platform currently holds and lists the removals and upserts needed to
//! converge. Plans are pure data; the platform driver applies them.
//!
//! Only the contexts the desired state manages are ever changed. A remote
//! value in any other context survives every removal and every update.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::core::config::Project;
use crate::core::constants::{ENVIRONMENT_VAR, PROJECT_VAR};

/// Context name to value.
pub type ContextValues = BTreeMap<String, String>;

/// One platform row backing a key, and the contexts it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRow {
    pub id: String,
    pub contexts: BTreeSet<String>,
}

/// One variable as a platform reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteVar {
    pub key: String,
    /// Platform rows backing this key. Empty when the platform addresses
    /// variables by key.
    pub rows: Vec<RemoteRow>,
    /// Values per context. A context whose value could not be read is absent.
    pub values: ContextValues,
}

/// Row operations that clear a key from some contexts.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RowChanges<'a> {
    /// Rows lying wholly inside the cleared contexts.
    pub drop: Vec<&'a RemoteRow>,
    /// Rows that also serve other contexts, with the contexts they keep.
    pub narrow: Vec<(&'a RemoteRow, Vec<String>)>,
}

impl RemoteVar {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, context: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(context.into(), value.into());
        self
    }

    pub fn with_row<I, S>(mut self, id: impl Into<String>, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(RemoteRow {
            id: id.into(),
            contexts: contexts.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Whether the key is present in any of `contexts`. A key the platform
    /// reports with no context at all counts as present everywhere.
    pub fn touches(&self, contexts: &BTreeSet<String>) -> bool {
        if self.values.is_empty() && self.rows.is_empty() {
            return true;
        }
        self.values.keys().any(|c| contexts.contains(c))
            || self
                .rows
                .iter()
                .any(|r| !r.contexts.is_disjoint(contexts))
    }

    /// Row operations clearing this key from `contexts`.
    pub fn clear_rows(&self, contexts: &BTreeSet<String>) -> RowChanges<'_> {
        let mut changes = RowChanges::default();
        for row in &self.rows {
            if row.contexts.is_disjoint(contexts) {
                continue;
            }
            let keep: Vec<String> = row.contexts.difference(contexts).cloned().collect();
            if keep.is_empty() {
                changes.drop.push(row);
            } else {
                changes.narrow.push((row, keep));
            }
        }
        changes
    }

    /// Values outside `contexts`.
    pub fn values_outside(&self, contexts: &BTreeSet<String>) -> ContextValues {
        self.values
            .iter()
            .filter(|(c, _)| !contexts.contains(*c))
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect()
    }
}

/// Secrets feeding one deploy context.
#[derive(Debug, Clone, Copy)]
pub struct ContextSecrets<'a> {
    /// Platform context name (`production`, `preview`, ...).
    pub context: &'a str,
    /// Canonical environment the context maps to (`prod` or `dev`).
    pub environment: &'a str,
    pub secrets: &'a BTreeMap<String, String>,
}

/// What the platform should hold for a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    vars: BTreeMap<String, ContextValues>,
    contexts: BTreeSet<String>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key in one context. The context becomes managed.
    pub fn insert(&mut self, key: impl Into<String>, context: impl Into<String>, value: impl Into<String>) {
        let context = context.into();
        self.contexts.insert(context.clone());
        self.vars.entry(key.into()).or_default().insert(context, value.into());
    }

    /// Manage a context without setting anything in it.
    pub fn manage(&mut self, context: impl Into<String>) {
        self.contexts.insert(context.into());
    }

    /// Build the desired state for a project.
    ///
    /// Secrets are filtered to `required`. The control keys are always
    /// present: `BWS_PROJECT` holds the project name and `BWS_ENV` holds
    /// each context's environment.
    pub fn build(project: &str, required: &BTreeSet<String>, contexts: &[ContextSecrets<'_>]) -> Self {
        let mut state = Self::new();
        for ctx in contexts {
            state.manage(ctx.context);
            for (key, value) in ctx.secrets {
                if required.contains(key) {
                    state.insert(key.as_str(), ctx.context, value.as_str());
                }
            }
            state.insert(PROJECT_VAR, ctx.context, project);
            state.insert(ENVIRONMENT_VAR, ctx.context, ctx.environment);
        }
        debug!(project = %project, keys = state.len(), contexts = state.contexts.len(), "built desired state");
        state
    }

    pub fn get(&self, key: &str) -> Option<&ContextValues> {
        self.vars.get(key)
    }

    /// Contexts this state owns.
    pub fn contexts(&self) -> &BTreeSet<String> {
        &self.contexts
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValues)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// One key to clear from the managed contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub var: RemoteVar,
    /// Contexts the key is cleared from.
    pub contexts: BTreeSet<String>,
}

impl Removal {
    pub fn key(&self) -> &str {
        &self.var.key
    }

    /// Values that must survive the removal.
    pub fn retained(&self) -> ContextValues {
        self.var.values_outside(&self.contexts)
    }
}

/// One key to create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub key: String,
    pub values: ContextValues,
    /// The platform already has this key.
    pub existing: Option<RemoteVar>,
}

impl Upsert {
    /// Contexts this upsert writes.
    pub fn contexts(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// Full value set after the update: existing values in other contexts
    /// are carried over.
    pub fn merged_values(&self) -> ContextValues {
        let mut merged = match &self.existing {
            Some(existing) => existing.values_outside(&self.contexts()),
            None => ContextValues::new(),
        };
        merged.extend(self.values.clone());
        merged
    }
}

/// Operations converging the remote state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub removals: Vec<Removal>,
    pub upserts: Vec<Upsert>,
    /// Keys already correct.
    pub unchanged: Vec<String>,
    /// Remote keys kept because they are protected.
    pub protected: Vec<String>,
}

impl ReconciliationPlan {
    /// Compute the plan for `project`.
    ///
    /// # Arguments
    ///
    /// * `project` - Supplies the preserve and exclusion lists
    /// * `desired` - What the platform should hold
    /// * `remote` - What the platform currently holds
    ///
    /// Remote keys that are neither desired nor protected are cleared from
    /// the managed contexts; keys living only in other contexts are left
    /// alone. Desired keys that are withheld are skipped. Desired keys whose
    /// remote value matches in every desired context are left alone; the
    /// rest are upserted.
    pub fn compute(project: &Project, desired: &DesiredState, remote: &[RemoteVar]) -> Self {
        let mut plan = Self::default();
        let managed = desired.contexts();
        let by_key: BTreeMap<&str, &RemoteVar> =
            remote.iter().map(|r| (r.key.as_str(), r)).collect();

        for var in remote {
            let wanted = desired.get(&var.key).is_some() && !project.is_withheld(&var.key);
            if wanted {
                continue;
            }
            if project.is_protected(&var.key) {
                plan.protected.push(var.key.clone());
            } else if var.touches(managed) {
                plan.removals.push(Removal {
                    var: var.clone(),
                    contexts: managed.clone(),
                });
            } else {
                debug!(key = %var.key, "key only set in unmanaged contexts");
            }
        }

        for (key, values) in desired.iter() {
            if project.is_withheld(key) {
                debug!(key = %key, "skipping preserved or excluded key");
                continue;
            }
            match by_key.get(key) {
                Some(current) if is_current(current, values) => plan.unchanged.push(key.to_string()),
                existing => plan.upserts.push(Upsert {
                    key: key.to_string(),
                    values: values.clone(),
                    existing: existing.map(|r| (*r).clone()),
                }),
            }
        }

        plan.protected.sort();
        plan.protected.dedup();
        plan
    }

    /// Nothing to remove or upsert.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.upserts.is_empty()
    }

    pub fn removal_keys(&self) -> Vec<&str> {
        self.removals.iter().map(Removal::key).collect()
    }

    pub fn upsert_keys(&self) -> Vec<&str> {
        self.upserts.iter().map(|u| u.key.as_str()).collect()
    }
}

fn is_current(remote: &RemoteVar, desired: &ContextValues) -> bool {
    desired
        .iter()
        .all(|(ctx, value)| remote.values.get(ctx) == Some(value))
}
