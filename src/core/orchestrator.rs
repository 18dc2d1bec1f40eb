//! The secure-run pipeline.
//!
//! Scan, validate the token, resolve the selection, fetch and seal secrets,
//! reconcile the deploy target when running on a platform, then hand the
//! assembled environment to the wrapped command. Every phase reads the
//! immutable [`EnvSnapshot`] captured at startup; nothing here touches the
//! process environment.
//!
//! User-facing progress is reported through [`Observer`] so the terminal
//! rendering lives in the CLI layer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use crate::core::cipher::EphemeralKey;
use crate::core::config::{self, Config, Project};
use crate::core::constants::{
    CONFIG_FILE, CONTROL_TEST_VARS, ENVIRONMENT_VAR, ENV_FILE, EPHEMERAL_KEY_VAR,
    NESTED_GUARD_VAR, NO_OVERRIDE_VAR, PLATFORM_TOKEN_VARS, PROJECT_VAR, REMOTE_CONFIG_PREFIX,
    REQUIRED_VARS_FILE, SCOPE_ID_VAR, SITE_NAME_VAR,
};
use crate::core::detect::Platform;
use crate::core::env::Dotenv;
use crate::core::envblock::{self, Selection};
use crate::core::plan::{ContextSecrets, DesiredState};
use crate::core::platform::{self, Outcome};
use crate::core::resolver::{Chooser, Resolution, Resolver};
use crate::core::retry::RetryPolicy;
use crate::core::scanner::{report, Scanner};
use crate::core::snapshot::EnvSnapshot;
use crate::core::store::{BundleId, CleanupGuard, SecureStore};
use crate::core::vault::{self, HttpVault, Secret, SecretSource, TokenStatus};
use crate::error::{AuthError, ConfigError, Error, ReconcileError, Result};

/// What the environment summary shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub project: String,
    pub environment: String,
    pub scope_id: String,
    /// Secrets loaded for the active scope.
    pub loaded: usize,
    /// The control variable that proves secrets arrived, with its value.
    pub control: Option<(String, String)>,
}

/// Progress reported while preparing the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A parent run already assembled the environment.
    Nested,
    Scanned { files: usize, names: usize },
    ScanReused { names: usize },
    /// No token outside a platform build; the run continues locally.
    TokenMissing,
    /// Rejected token outside a platform build; the run continues locally.
    TokenInvalid { reason: String },
    ConfigRefreshed { documents: usize },
    Resolved(Resolution),
    Loaded { scope_id: String, count: usize },
    Synced { platform: Platform, project: String, outcome: Outcome },
    Summary(Summary),
    /// Decrypted bundle contents, only emitted when reveal is enabled.
    Revealed { bundle: String, secrets: BTreeMap<String, String> },
}

/// Receives [`Event`]s as the pipeline advances.
pub trait Observer: Send + Sync {
    fn notify(&self, event: Event);
}

/// Observer that drops every event.
pub struct Silent;

impl Observer for Silent {
    fn notify(&self, _: Event) {}
}

/// The environment handed to the wrapped command.
#[derive(Debug)]
pub struct Prepared {
    pub env: EnvSnapshot,
    pub resolution: Option<Resolution>,
    pub outcomes: Vec<Outcome>,
    /// Removes the run's bundles once the command has finished.
    pub guard: Option<CleanupGuard>,
}

impl Prepared {
    fn passthrough(env: EnvSnapshot) -> Self {
        Self {
            env,
            resolution: None,
            outcomes: Vec::new(),
            guard: None,
        }
    }
}

/// Drives one secure-run invocation.
pub struct Orchestrator<'a> {
    dir: PathBuf,
    snapshot: EnvSnapshot,
    platform: Option<Platform>,
    rescan: bool,
    vault: Option<Box<dyn SecretSource>>,
    platform_policy: RetryPolicy,
    chooser: &'a dyn Chooser,
    observer: &'a dyn Observer,
}

impl<'a> Orchestrator<'a> {
    /// An orchestrator for the project in `dir`.
    ///
    /// `snapshot` is the caller's environment before `.env` is merged.
    pub fn new(
        dir: impl Into<PathBuf>,
        snapshot: EnvSnapshot,
        chooser: &'a dyn Chooser,
        observer: &'a dyn Observer,
    ) -> Self {
        let platform = Platform::detect(&snapshot);
        Self {
            dir: dir.into(),
            snapshot,
            platform,
            rescan: false,
            vault: None,
            platform_policy: RetryPolicy::platform(),
            chooser,
            observer,
        }
    }

    /// Force a fresh scan even when a report exists.
    pub fn with_rescan(mut self, rescan: bool) -> Self {
        self.rescan = rescan;
        self
    }

    /// Use `vault` instead of a client built from the environment.
    pub fn with_vault(mut self, vault: Box<dyn SecretSource>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Retry policy for platform API calls.
    pub fn with_platform_policy(mut self, policy: RetryPolicy) -> Self {
        self.platform_policy = policy;
        self
    }

    /// Run every phase up to, but not including, the wrapped command.
    ///
    /// # Errors
    ///
    /// Any error on a platform is fatal, as are configuration, resolution,
    /// active-scope fetch and reconciliation failures locally. A missing or
    /// invalid token locally is not an error: the run continues with the
    /// `.env` values only.
    pub async fn prepare(mut self) -> Result<Prepared> {
        if self.snapshot.is_nested() {
            debug!("nested invocation, inheriting the parent environment");
            self.observer.notify(Event::Nested);
            return Ok(Prepared::passthrough(self.snapshot.clone()));
        }

        let required = self.required_names()?;

        let env_path = self.dir.join(ENV_FILE);
        let env_text = std::fs::read_to_string(&env_path).unwrap_or_default();
        let merged = self
            .snapshot
            .with_defaults(Dotenv::load_optional(&env_path)?.into_map());

        let vault = match self.vault.take() {
            Some(v) => v,
            None => Box::new(HttpVault::from_snapshot(&merged)),
        };

        match vault.validate().await {
            TokenStatus::Valid => debug!("access token accepted"),
            TokenStatus::Missing => {
                if self.platform.is_some() {
                    return Err(AuthError::MissingToken.into());
                }
                self.observer.notify(Event::TokenMissing);
                info!("no access token, continuing with .env values only");
                return Ok(Prepared::passthrough(merged));
            }
            TokenStatus::Invalid(reason) => {
                if self.platform.is_some() {
                    return Err(AuthError::InvalidToken(reason).into());
                }
                self.observer.notify(Event::TokenInvalid { reason });
                info!("access token rejected, continuing with .env values only");
                return Ok(Prepared::passthrough(merged));
            }
        }

        if let Some(platform) = self.platform {
            let identified = self.snapshot.non_empty(SITE_NAME_VAR).is_some()
                || (platform == Platform::Vercel && self.snapshot.non_empty(PROJECT_VAR).is_some());
            if !identified {
                warn!(platform = platform.name(), "no site identifier on a platform build");
                return Err(ReconcileError::MissingSiteName.into());
            }
        }

        let overlay_wanted =
            !merged.flag(NO_OVERRIDE_VAR) && !config::overlay_is_fresh(&self.dir);
        let visible = if overlay_wanted || self.platform.is_some() {
            match vault.list_all().await {
                Ok(all) => all,
                Err(e) => {
                    warn!(error = %e, "could not list visible secrets");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        if overlay_wanted {
            self.refresh_config(&merged, &visible);
        }

        let config = Config::load(&self.dir, &merged)?;
        let persisted = match self.platform {
            Some(_) => Selection::default(),
            None => envblock::read_selection(&env_text),
        };
        let resolver = Resolver::new(&config, &self.snapshot)
            .with_persisted(persisted)
            .with_platform(self.platform);
        let resolution = resolver.resolve(self.chooser)?;
        self.observer.notify(Event::Resolved(resolution.clone()));

        if let Some(platform) = self.platform {
            if resolution.project.platform != platform {
                return Err(ReconcileError::PlatformMismatch {
                    project: resolution.project.name.clone(),
                    configured: resolution.project.platform.display_name().to_string(),
                    detected: platform.display_name(),
                }
                .into());
            }
        } else if let Err(e) = envblock::persist(&env_path, &resolver.block(&resolution)) {
            warn!(error = %e, "could not update the .env selection block");
        }

        let (key, generated) = EphemeralKey::from_snapshot_or_generate(&merged);
        debug!(key = %key.fingerprint(), generated, "ephemeral key ready");
        let guard = CleanupGuard::install(&self.dir);
        let store = SecureStore::new(&self.dir, key);

        let scopes = self.fetch_scopes(vault.as_ref(), &store, &resolution).await?;

        let tokens: BTreeMap<String, String> = visible
            .into_iter()
            .filter(|s| PLATFORM_TOKEN_VARS.contains(&s.key.as_str()))
            .map(|s| (s.key, s.value))
            .collect();
        if !tokens.is_empty() {
            store.write(BundleId::Global, &tokens)?;
        }

        let mut outcomes = Vec::new();
        if let Some(platform) = self.platform {
            let outcome = self
                .sync(platform, &resolution.project, &required, &scopes, &merged, &tokens)
                .await?;
            outcomes.push(outcome);
        }

        let active = scopes.get(&resolution.scope_id).cloned().unwrap_or_default();
        let env = merged.with_defaults(&active);
        self.summarize(&resolution, &active, &env)?;

        if merged.reveal_secrets() {
            self.reveal(&store, &scopes)?;
        }

        let hex = store.key().to_hex();
        let env = env.with_overrides([
            (EPHEMERAL_KEY_VAR, hex.as_str()),
            (NESTED_GUARD_VAR, "true"),
            (PROJECT_VAR, resolution.project.name.as_str()),
            (ENVIRONMENT_VAR, resolution.environment.as_str()),
            (SCOPE_ID_VAR, resolution.scope_id.as_str()),
        ]);

        Ok(Prepared {
            env,
            resolution: Some(resolution),
            outcomes,
            guard: Some(guard),
        })
    }

    /// Required variable names, from the report or a fresh scan.
    ///
    /// Platform builds always rescan so a stale committed report cannot
    /// narrow what gets synced.
    fn required_names(&self) -> Result<BTreeSet<String>> {
        let path = self.dir.join(REQUIRED_VARS_FILE);
        if !self.rescan && self.platform.is_none() {
            if let Some(names) = report::read(&path)? {
                debug!(names = names.len(), "using existing required variables report");
                self.observer.notify(Event::ScanReused { names: names.len() });
                return Ok(names);
            }
        }

        let result = Scanner::new(&self.dir).scan(&[])?;
        report::write(&path, &result)?;
        let required = result.required();
        self.observer.notify(Event::Scanned {
            files: result.files_scanned,
            names: required.len(),
        });
        Ok(required)
    }

    /// Merge remote configuration documents into the local config file.
    fn refresh_config(&self, snapshot: &EnvSnapshot, visible: &[Secret]) {
        let documents: Vec<(String, String)> = visible
            .iter()
            .filter(|s| s.key.starts_with(REMOTE_CONFIG_PREFIX))
            .map(|s| (s.key.clone(), s.value.clone()))
            .collect();
        if documents.is_empty() {
            debug!("no remote configuration");
            return;
        }
        let target =
            Config::locate(&self.dir, snapshot).unwrap_or_else(|| self.dir.join(CONFIG_FILE));
        match config::apply_overlay(&self.dir, &target, &documents) {
            Ok(applied) => self.observer.notify(Event::ConfigRefreshed { documents: applied }),
            Err(e) => warn!(error = %e, "remote configuration not applied"),
        }
    }

    /// Fetch the active scope, then every sibling scope of the project.
    ///
    /// Each non-empty scope is sealed into its bundle. A failure on the
    /// active scope is fatal; sibling failures are warnings.
    async fn fetch_scopes(
        &self,
        vault: &dyn SecretSource,
        store: &SecureStore,
        resolution: &Resolution,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let mut order = vec![resolution.scope_id.as_str()];
        for id in resolution.project.scope_ids() {
            if !order.contains(&id) {
                order.push(id);
            }
        }

        let mut scopes = BTreeMap::new();
        for (i, scope_id) in order.into_iter().enumerate() {
            let secrets = match vault.list_scope(scope_id).await {
                Ok(list) => vault::to_map(list),
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(scope = %scope_id, error = %e, "skipping sibling scope");
                    continue;
                }
            };
            if secrets.is_empty() {
                warn!(scope = %scope_id, "scope holds no secrets");
            } else {
                store.write(BundleId::Scope(scope_id), &secrets)?;
            }
            self.observer.notify(Event::Loaded {
                scope_id: scope_id.to_string(),
                count: secrets.len(),
            });
            scopes.insert(scope_id.to_string(), secrets);
        }
        Ok(scopes)
    }

    /// Reconcile the project's deploy target with its vault secrets.
    async fn sync(
        &self,
        platform: Platform,
        project: &Project,
        required: &BTreeSet<String>,
        scopes: &BTreeMap<String, BTreeMap<String, String>>,
        snapshot: &EnvSnapshot,
        tokens: &BTreeMap<String, String>,
    ) -> Result<Outcome> {
        let token = platform
            .token(snapshot)
            .map(str::to_string)
            .or_else(|| {
                platform
                    .token_vars()
                    .iter()
                    .find_map(|var| tokens.get(*var).filter(|t| !t.trim().is_empty()).cloned())
            })
            .ok_or(AuthError::MissingPlatformToken {
                platform: platform.display_name(),
                var: platform.token_var(),
            })?;

        let reconciler = platform::reconciler_for(platform, snapshot, &token);
        let empty = BTreeMap::new();
        let mut contexts = Vec::new();
        let mut loaded = 0;
        for ctx in reconciler.contexts() {
            let secrets = match project.scope_for(ctx.environment) {
                Some(id) => scopes.get(id).unwrap_or(&empty),
                None => {
                    warn!(
                        project = %project.name,
                        context = ctx.name,
                        environment = ctx.environment,
                        "no scope configured for context, leaving it unmanaged"
                    );
                    continue;
                }
            };
            loaded += secrets.len();
            contexts.push(ContextSecrets {
                context: ctx.name,
                environment: ctx.environment,
                secrets,
            });
        }
        if loaded == 0 {
            return Err(ReconcileError::NoSecrets(project.name.clone()).into());
        }

        let desired = DesiredState::build(&project.name, required, &contexts);
        info!(
            platform = platform.name(),
            project = %project.name,
            keys = desired.len(),
            "syncing platform variables"
        );
        let outcome =
            platform::reconcile(reconciler.as_ref(), project, &desired, &self.platform_policy)
                .await?;
        self.observer.notify(Event::Synced {
            platform,
            project: project.name.clone(),
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Report what was loaded and insist on a control variable.
    fn summarize(
        &self,
        resolution: &Resolution,
        active: &BTreeMap<String, String>,
        env: &EnvSnapshot,
    ) -> Result<()> {
        let control = CONTROL_TEST_VARS
            .iter()
            .find_map(|var| env.non_empty(var).map(|v| (var.to_string(), v.to_string())));
        let missing = control.is_none();
        self.observer.notify(Event::Summary(Summary {
            project: resolution.project.name.clone(),
            environment: resolution.environment.clone(),
            scope_id: resolution.scope_id.clone(),
            loaded: active.len(),
            control,
        }));
        if missing {
            return Err(ConfigError::MissingControlVariable.into());
        }
        Ok(())
    }

    /// Decrypt every bundle back for inspection.
    fn reveal(
        &self,
        store: &SecureStore,
        scopes: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<()> {
        let ids = std::iter::once(BundleId::Global)
            .chain(scopes.keys().map(|id| BundleId::Scope(id.as_str())));
        for id in ids {
            if let Some(secrets) = store.read(id)? {
                self.observer.notify(Event::Revealed {
                    bundle: bundle_label(&store.path(id)),
                    secrets,
                });
            }
        }
        Ok(())
    }
}

fn bundle_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

const SHELL_SYNTAX: &[char] = &[
    ' ', '|', '&', ';', '<', '>', '(', ')', '$', '`', '*', '?', '"', '\'', '\n',
];

/// Whether `command` must go through a shell.
pub fn needs_shell(command: &[String]) -> bool {
    matches!(command, [only] if only.contains(SHELL_SYNTAX))
}

/// Run `command` with exactly the variables in `env`.
///
/// Returns the command's exit code; termination by a signal is reported
/// as 1.
///
/// # Errors
///
/// Returns an error if the program cannot be found or started.
pub async fn execute(command: &[String], env: &EnvSnapshot, dir: &Path) -> Result<i32> {
    let Some((program, args)) = command.split_first() else {
        return Err(Error::Other("no command specified".to_string()));
    };

    let mut cmd = if needs_shell(command) {
        shell(program)
    } else {
        let resolved = which::which_in(program, env.get("PATH"), dir)
            .map_err(|_| Error::Other(format!("command not found: {}", program)))?;
        let mut cmd = tokio::process::Command::new(resolved);
        cmd.args(args);
        cmd
    };

    debug!(command = %command.join(" "), shell = needs_shell(command), "starting command");
    let status = cmd
        .current_dir(dir)
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;

    let code = status.code().unwrap_or(1);
    debug!(code, "command finished");
    Ok(code)
}

#[cfg(unix)]
fn shell(line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(not(unix))]
fn shell(line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}
