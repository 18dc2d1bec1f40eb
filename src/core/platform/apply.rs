//! Plan and apply a reconciliation against one platform target.
//!
//! Removals run first, then upserts. Each batch fans out concurrently and
//! is awaited as a whole before the pacing pause and the next batch. Every
//! call goes through the retry policy. Anything still failing afterwards
//! aborts the run.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{PlatformError, Reconciler, Target};
use crate::core::config::Project;
use crate::core::plan::{DesiredState, ReconciliationPlan};
use crate::core::retry::{Exhausted, RetryPolicy};
use crate::error::{AuthError, Error, RateLimitError, ReconcileError, Result};

/// Summary of one applied reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub target: Target,
    pub deleted: Vec<String>,
    pub upserted: Vec<String>,
    pub unchanged: usize,
    pub protected: Vec<String>,
}

/// Reconcile `project` on the reconciler's platform.
///
/// # Arguments
///
/// * `reconciler` - Platform primitives
/// * `project` - Project whose target is reconciled
/// * `desired` - What the target should hold
/// * `policy` - Retry policy applied to every call
///
/// # Errors
///
/// Returns `ReconcileError::DeleteFailed` or `ReconcileError::CreateFailed`
/// listing the keys that could not be applied, `AuthError::PlatformTokenRejected`
/// on 401/403, or `ReconcileError::TargetNotFound`.
pub async fn reconcile(
    reconciler: &dyn Reconciler,
    project: &Project,
    desired: &DesiredState,
    policy: &RetryPolicy,
) -> Result<Outcome> {
    let platform = reconciler.platform().display_name();
    let pacing = reconciler.pacing();

    let target = policy
        .run("locate target", || reconciler.locate(&project.name))
        .await
        .map_err(|e| fatal(platform, "locate target", e))?;
    debug!(platform, target = %target.id, "located target");

    let remote = policy
        .run("list variables", || reconciler.enumerate(&target))
        .await
        .map_err(|e| fatal(platform, "list variables", e))?;

    let plan = ReconciliationPlan::compute(project, desired, &remote);
    info!(
        platform,
        project = %project.name,
        removals = plan.removals.len(),
        upserts = plan.upserts.len(),
        unchanged = plan.unchanged.len(),
        protected = plan.protected.len(),
        "computed reconciliation plan"
    );

    let mut failed = Vec::new();
    let batches: Vec<_> = plan.removals.chunks(pacing.delete_batch.max(1)).collect();
    for (i, batch) in batches.iter().enumerate() {
        debug!(platform, batch = i + 1, of = batches.len(), size = batch.len(), "removing");
        let results = join_all(batch.iter().map(|removal| {
            let target = &target;
            async move {
                let result = policy
                    .run("delete variable", || reconciler.remove(target, removal))
                    .await;
                (removal.key(), result)
            }
        }))
        .await;

        for (key, result) in results {
            if let Err(e) = result {
                if e.last.is_auth() {
                    return Err(fatal(platform, "delete variable", e));
                }
                warn!(platform, key = %key, attempts = e.attempts, error = %e.last, "delete failed");
                failed.push(key.to_string());
            }
        }
        if i + 1 < batches.len() {
            tokio::time::sleep(pacing.pause()).await;
        }
    }
    if !failed.is_empty() {
        return Err(ReconcileError::DeleteFailed {
            platform,
            keys: failed,
        }
        .into());
    }

    let batches: Vec<_> = plan.upserts.chunks(pacing.upsert_batch.max(1)).collect();
    for (i, batch) in batches.iter().enumerate() {
        debug!(platform, batch = i + 1, of = batches.len(), size = batch.len(), "upserting");
        let result = policy
            .run("upsert variables", || reconciler.upsert(&target, batch))
            .await;
        if let Err(e) = result {
            if e.last.is_auth() {
                return Err(fatal(platform, "upsert variables", e));
            }
            warn!(platform, attempts = e.attempts, error = %e.last, "upsert batch failed");
            failed.extend(batch.iter().map(|u| u.key.clone()));
        }
        if i + 1 < batches.len() {
            tokio::time::sleep(pacing.pause()).await;
        }
    }
    if !failed.is_empty() {
        return Err(ReconcileError::CreateFailed {
            platform,
            keys: failed,
        }
        .into());
    }

    Ok(Outcome {
        target,
        deleted: plan.removals.iter().map(|r| r.key().to_string()).collect(),
        upserted: plan.upserts.iter().map(|u| u.key.clone()).collect(),
        unchanged: plan.unchanged.len(),
        protected: plan.protected,
    })
}

/// Map a failed lookup or auth failure to the crate taxonomy.
fn fatal(platform: &'static str, operation: &str, e: Exhausted<PlatformError>) -> Error {
    match e.last {
        err if err.is_auth() => AuthError::PlatformTokenRejected {
            platform,
            reason: err.to_string(),
        }
        .into(),
        PlatformError::NotFound(name) => ReconcileError::TargetNotFound { platform, name }.into(),
        err if e.rate_limited => RateLimitError::Exhausted {
            operation: format!("{} {}", platform, operation),
            attempts: e.attempts,
            message: err.to_string(),
        }
        .into(),
        err => ReconcileError::Request {
            platform,
            message: format!("{}: {}", operation, err),
        }
        .into(),
    }
}
