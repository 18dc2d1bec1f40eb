//! Active project and environment resolution.
//!
//! Project precedence:
//!
//! 1. `BWS_PROJECT` exported by the caller
//! 2. the selection persisted in the `.env` block
//! 3. `SITE_NAME` when running on a deployment platform
//! 4. the only configured project
//! 5. an interactive prompt, only when attached to a terminal
//!
//! On a platform nothing past step 4 is allowed: an unresolved project is
//! fatal instead of a prompt that would hang the build.

use std::io::{self, IsTerminal};

use tracing::{debug, info, warn};

use crate::core::config::{Config, Project};
use crate::core::constants::{ENVIRONMENT_VAR, PROJECT_VAR, SCOPE_ID_VAR, SITE_NAME_VAR};
use crate::core::detect::Platform;
use crate::core::envblock::{EnvBlock, Selection};
use crate::core::snapshot::EnvSnapshot;
use crate::core::validation;
use crate::error::{ConfigError, ResolveError, Result};

/// Canonical name for an environment alias.
///
/// Matching is case-insensitive. Unknown names pass through lower-cased
/// with a warning.
pub fn normalize_environment(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "" | "local" | "development-local" => "local",
        "prod" | "production" => "prod",
        "dev" | "develop" | "development" => "dev",
        "preview" | "deploy-preview" | "branch-deploy" | "deploy" | "deploy/preview" | "branch"
        | "test" => "dev",
        "staging" | "stage" => "staging",
        _ => {
            warn!(environment = %lowered, "unrecognized environment name, using it as is");
            return lowered;
        }
    };
    canonical.to_string()
}

/// Detect the environment from the caller's variables.
///
/// `BWS_ENV`, then the persisted selection, then the platform's deploy
/// context (`dev` when the platform does not say), then `local`.
pub fn detect_environment(
    snapshot: &EnvSnapshot,
    persisted: Option<&str>,
    platform: Option<Platform>,
) -> String {
    if let Some(explicit) = snapshot.non_empty(ENVIRONMENT_VAR) {
        return normalize_environment(explicit);
    }
    if let Some(saved) = persisted {
        return normalize_environment(saved);
    }
    match platform {
        Some(p) => normalize_environment(p.deploy_context(snapshot).unwrap_or("dev")),
        None => "local".to_string(),
    }
}

/// Where the project choice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectSource {
    Explicit,
    Persisted,
    SiteName,
    Single,
    Prompt,
}

/// Interactive project chooser.
pub trait Chooser {
    /// Pick one of `projects`, returning its index.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::NotInteractive` when no terminal is attached,
    /// or `ResolveError::Prompt` when the prompt itself fails.
    fn choose(&self, projects: &[&str]) -> Result<usize>;
}

/// [`Chooser`] backed by a `dialoguer` select list on the terminal.
pub struct TerminalChooser;

impl Chooser for TerminalChooser {
    fn choose(&self, projects: &[&str]) -> Result<usize> {
        if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
            return Err(ResolveError::NotInteractive.into());
        }
        let index = dialoguer::Select::new()
            .with_prompt("Select a project")
            .items(projects)
            .default(0)
            .interact()
            .map_err(|e| ResolveError::Prompt(e.to_string()))?;
        Ok(index)
    }
}

/// The resolved (project, environment, scope) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub project: Project,
    pub environment: String,
    pub scope_id: String,
    pub source: ProjectSource,
}

/// Resolves the active selection against a configuration.
pub struct Resolver<'a> {
    config: &'a Config,
    snapshot: &'a EnvSnapshot,
    persisted: Selection,
    platform: Option<Platform>,
}

impl<'a> Resolver<'a> {
    /// A resolver over the caller's own variables.
    ///
    /// `snapshot` must be the process environment before `.env` is merged,
    /// so an explicit `BWS_PROJECT` can be told apart from the persisted one.
    pub fn new(config: &'a Config, snapshot: &'a EnvSnapshot) -> Self {
        Self {
            config,
            snapshot,
            persisted: Selection::default(),
            platform: Platform::detect(snapshot),
        }
    }

    /// Use a selection read from the `.env` block.
    pub fn with_persisted(mut self, persisted: Selection) -> Self {
        self.persisted = persisted;
        self
    }

    /// Override platform detection.
    pub fn with_platform(mut self, platform: Option<Platform>) -> Self {
        self.platform = platform;
        self
    }

    /// The detected platform, if any.
    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    /// Resolve project, environment and scope id.
    ///
    /// # Errors
    ///
    /// Returns a `ResolveError` when no project can be chosen, or
    /// `ConfigError` when the chosen project is unknown or has no scopes.
    pub fn resolve(&self, chooser: &dyn Chooser) -> Result<Resolution> {
        let (project, source) = self.resolve_project(chooser)?;
        let environment = detect_environment(
            self.snapshot,
            self.persisted.environment.as_deref(),
            self.platform,
        );
        let scope_id = self.resolve_scope(project, &environment)?;

        info!(
            project = %project.name,
            environment = %environment,
            source = ?source,
            "resolved selection"
        );
        Ok(Resolution {
            project: project.clone(),
            environment,
            scope_id,
            source,
        })
    }

    /// Choose the active project.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub fn resolve_project(&self, chooser: &dyn Chooser) -> Result<(&'a Project, ProjectSource)> {
        if self.config.projects.is_empty() {
            return Err(ResolveError::NoProjects.into());
        }
        let site = self
            .platform
            .and_then(|_| self.snapshot.non_empty(SITE_NAME_VAR));

        if let Some(name) = self.snapshot.non_empty(PROJECT_VAR) {
            let project = self
                .config
                .find_on(self.platform, name)
                .ok_or_else(|| ConfigError::ProjectNotFound(name.to_string()))?;
            if let Some(site) = site.filter(|s| *s != name) {
                warn!(project = %name, site = %site, "BWS_PROJECT and SITE_NAME differ, using BWS_PROJECT");
            }
            return Ok((project, ProjectSource::Explicit));
        }

        if let Some(name) = self.persisted.project.as_deref() {
            match self.config.find_on(self.platform, name) {
                Some(project) => return Ok((project, ProjectSource::Persisted)),
                None => warn!(project = %name, "persisted project is no longer configured"),
            }
        }

        if let Some(site) = site {
            let project = self
                .config
                .find_on(self.platform, site)
                .ok_or_else(|| ResolveError::UnknownSite(site.to_string()))?;
            return Ok((project, ProjectSource::SiteName));
        }

        if let [only] = self.config.projects.as_slice() {
            debug!(project = %only.name, "single project configured");
            return Ok((only, ProjectSource::Single));
        }

        if let Some(platform) = self.platform {
            return Err(ResolveError::Ambiguous {
                platform: platform.display_name(),
            }
            .into());
        }

        let names: Vec<&str> = self.config.projects.iter().map(|p| p.name.as_str()).collect();
        let index = chooser.choose(&names)?;
        let project = self
            .config
            .projects
            .get(index)
            .ok_or_else(|| ResolveError::Prompt(format!("selection {} out of range", index)))?;
        Ok((project, ProjectSource::Prompt))
    }

    /// Scope id for the project, honouring a `BWS_PROJECT_ID` override.
    fn resolve_scope(&self, project: &Project, environment: &str) -> Result<String> {
        if let Some(id) = self.snapshot.non_empty(SCOPE_ID_VAR) {
            if validation::is_scope_id(id) {
                debug!(scope = %id, "using scope id from BWS_PROJECT_ID");
                return Ok(id.to_string());
            }
            warn!(scope = %id, "ignoring BWS_PROJECT_ID, not a valid scope id");
        }
        project.scope_with_fallback(environment).map(str::to_string)
    }

    /// The `.env` block recording `resolution`.
    pub fn block(&self, resolution: &Resolution) -> EnvBlock {
        let mut projects: Vec<String> = Vec::new();
        for project in &self.config.projects {
            if !projects.contains(&project.name) {
                projects.push(project.name.clone());
            }
        }
        let mut environments = self.config.environments();
        if !environments.is_empty() && !environments.contains(&resolution.environment) {
            environments.push(resolution.environment.clone());
        }
        EnvBlock::new(
            projects,
            resolution.project.name.clone(),
            environments,
            resolution.environment.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigFile;
    use crate::error::Error;
    use std::cell::Cell;
    use std::path::PathBuf;

    const SCOPE_A: &str = "11111111-1111-4111-8111-111111111111";
    const SCOPE_B: &str = "22222222-2222-4222-8222-222222222222";
    const SCOPE_C: &str = "33333333-3333-4333-8333-333333333333";

    fn config(two: bool) -> Config {
        let mut text = format!(
            r#"{{"projects":[{{"projectName":"web","platform":"netlify",
                "vaultProjectIds":{{"prod":"{SCOPE_A}","dev":"{SCOPE_B}"}}}}"#
        );
        if two {
            text.push_str(&format!(
                r#",{{"projectName":"docs","platform":"vercel","vaultProjectIds":{{"dev":"{SCOPE_C}"}}}}"#
            ));
        }
        text.push_str("]}");
        let file: ConfigFile = serde_json::from_str(&text).unwrap();
        Config::from_file(PathBuf::from("bwsconfig.json"), &file).unwrap()
    }

    struct Fixed(usize, Cell<bool>);

    impl Fixed {
        fn new(index: usize) -> Self {
            Self(index, Cell::new(false))
        }
    }

    impl Chooser for Fixed {
        fn choose(&self, _: &[&str]) -> Result<usize> {
            self.1.set(true);
            Ok(self.0)
        }
    }

    struct NoTerminal;

    impl Chooser for NoTerminal {
        fn choose(&self, _: &[&str]) -> Result<usize> {
            Err(ResolveError::NotInteractive.into())
        }
    }

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(normalize_environment(""), "local");
        assert_eq!(normalize_environment("Production"), "prod");
        assert_eq!(normalize_environment("deploy-preview"), "dev");
        assert_eq!(normalize_environment("BRANCH-DEPLOY"), "dev");
        assert_eq!(normalize_environment("development"), "dev");
        assert_eq!(normalize_environment("stage"), "staging");
        assert_eq!(normalize_environment("development-local"), "local");
    }

    #[test]
    fn test_normalize_unknown_passes_through() {
        assert_eq!(normalize_environment("QA"), "qa");
    }

    #[test]
    fn test_detect_environment_order() {
        let netlify = EnvSnapshot::from_pairs([("NETLIFY", "true"), ("CONTEXT", "production")]);
        assert_eq!(detect_environment(&netlify, None, Some(Platform::Netlify)), "prod");
        assert_eq!(detect_environment(&netlify, Some("dev"), Some(Platform::Netlify)), "dev");

        let explicit = EnvSnapshot::from_pairs([("BWS_ENV", "production")]);
        assert_eq!(detect_environment(&explicit, Some("dev"), None), "prod");

        let vercel = EnvSnapshot::from_pairs([("VERCEL", "1")]);
        assert_eq!(detect_environment(&vercel, None, Some(Platform::Vercel)), "dev");

        assert_eq!(detect_environment(&EnvSnapshot::default(), None, None), "local");
    }

    #[test]
    fn test_explicit_project_wins() {
        let cfg = config(true);
        let snap = EnvSnapshot::from_pairs([("BWS_PROJECT", "docs")]);
        let resolver = Resolver::new(&cfg, &snap).with_persisted(Selection {
            project: Some("web".to_string()),
            environment: None,
        });

        let res = resolver.resolve(&NoTerminal).unwrap();
        assert_eq!(res.project.name, "docs");
        assert_eq!(res.source, ProjectSource::Explicit);
        // docs has no local scope
        assert_eq!(res.scope_id, SCOPE_C);
    }

    #[test]
    fn test_unknown_explicit_project_is_fatal() {
        let cfg = config(true);
        let snap = EnvSnapshot::from_pairs([("BWS_PROJECT", "nope")]);
        let err = Resolver::new(&cfg, &snap).resolve(&NoTerminal).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ProjectNotFound(_))));
    }

    #[test]
    fn test_persisted_selection() {
        let cfg = config(true);
        let snap = EnvSnapshot::default();
        let res = Resolver::new(&cfg, &snap)
            .with_persisted(Selection {
                project: Some("web".to_string()),
                environment: Some("prod".to_string()),
            })
            .resolve(&NoTerminal)
            .unwrap();
        assert_eq!(res.source, ProjectSource::Persisted);
        assert_eq!(res.environment, "prod");
        assert_eq!(res.scope_id, SCOPE_A);
    }

    #[test]
    fn test_site_name_on_platform() {
        let cfg = config(true);
        let snap = EnvSnapshot::from_pairs([
            ("NETLIFY", "true"),
            ("CONTEXT", "deploy-preview"),
            ("SITE_NAME", "web"),
        ]);
        let res = Resolver::new(&cfg, &snap).resolve(&NoTerminal).unwrap();
        assert_eq!(res.source, ProjectSource::SiteName);
        assert_eq!(res.environment, "dev");
        assert_eq!(res.scope_id, SCOPE_B);
    }

    #[test]
    fn test_same_name_resolves_to_the_detected_platform() {
        let text = format!(
            r#"{{"projects":[
                {{"projectName":"web","platform":"netlify","vaultProjectIds":{{"prod":"{SCOPE_A}"}}}},
                {{"projectName":"web","platform":"vercel","vaultProjectIds":{{"prod":"{SCOPE_C}"}}}}
            ]}}"#
        );
        let file: ConfigFile = serde_json::from_str(&text).unwrap();
        let cfg = Config::from_file(PathBuf::from("bwsconfig.json"), &file).unwrap();

        let explicit = EnvSnapshot::from_pairs([
            ("VERCEL", "1"),
            ("VERCEL_ENV", "production"),
            ("BWS_PROJECT", "web"),
        ]);
        let res = Resolver::new(&cfg, &explicit).resolve(&NoTerminal).unwrap();
        assert_eq!(res.project.platform, Platform::Vercel);
        assert_eq!(res.scope_id, SCOPE_C);

        let site = EnvSnapshot::from_pairs([
            ("NETLIFY", "true"),
            ("CONTEXT", "production"),
            ("SITE_NAME", "web"),
        ]);
        let res = Resolver::new(&cfg, &site).resolve(&NoTerminal).unwrap();
        assert_eq!(res.project.platform, Platform::Netlify);
        assert_eq!(res.scope_id, SCOPE_A);

        let resolver = Resolver::new(&cfg, &site);
        let res = resolver.resolve(&NoTerminal).unwrap();
        assert_eq!(resolver.block(&res).projects, vec!["web"]);
    }

    #[test]
    fn test_unknown_site_is_fatal() {
        let cfg = config(false);
        let snap = EnvSnapshot::from_pairs([("NETLIFY", "true"), ("SITE_NAME", "other")]);
        let err = Resolver::new(&cfg, &snap).resolve(&NoTerminal).unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::UnknownSite(_))));
    }

    #[test]
    fn test_single_project_auto_selected() {
        let cfg = config(false);
        let snap = EnvSnapshot::default();
        let res = Resolver::new(&cfg, &snap).resolve(&NoTerminal).unwrap();
        assert_eq!(res.source, ProjectSource::Single);
        assert_eq!(res.environment, "local");
    }

    #[test]
    fn test_platform_without_signal_is_fatal() {
        let cfg = config(true);
        let snap = EnvSnapshot::from_pairs([("VERCEL", "1")]);
        let chooser = Fixed::new(0);
        let err = Resolver::new(&cfg, &snap).resolve(&chooser).unwrap_err();

        assert!(matches!(err, Error::Resolve(ResolveError::Ambiguous { .. })));
        assert!(!chooser.1.get(), "must not prompt on a platform");
    }

    #[test]
    fn test_prompt_when_ambiguous_locally() {
        let cfg = config(true);
        let snap = EnvSnapshot::default();
        let chooser = Fixed::new(1);
        let res = Resolver::new(&cfg, &snap).resolve(&chooser).unwrap();

        assert!(chooser.1.get());
        assert_eq!(res.project.name, "docs");
        assert_eq!(res.source, ProjectSource::Prompt);
    }

    #[test]
    fn test_no_terminal_is_reported() {
        let cfg = config(true);
        let snap = EnvSnapshot::default();
        let err = Resolver::new(&cfg, &snap).resolve(&NoTerminal).unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::NotInteractive)));
    }

    #[test]
    fn test_scope_id_override() {
        let cfg = config(false);
        let snap = EnvSnapshot::from_pairs([("BWS_PROJECT_ID", SCOPE_C)]);
        let res = Resolver::new(&cfg, &snap).resolve(&NoTerminal).unwrap();
        assert_eq!(res.scope_id, SCOPE_C);

        let bad = EnvSnapshot::from_pairs([("BWS_PROJECT_ID", "not-a-uuid"), ("BWS_ENV", "prod")]);
        let res = Resolver::new(&cfg, &bad).resolve(&NoTerminal).unwrap();
        assert_eq!(res.scope_id, SCOPE_A);
    }

    #[test]
    fn test_block_includes_selected_environment() {
        let cfg = config(true);
        let snap = EnvSnapshot::from_pairs([("BWS_PROJECT", "web"), ("BWS_ENV", "qa")]);
        let resolver = Resolver::new(&cfg, &snap);
        let res = resolver.resolve(&NoTerminal).unwrap();
        let block = resolver.block(&res);

        assert_eq!(block.projects, vec!["web", "docs"]);
        assert!(block.environments.contains(&"qa".to_string()));
        assert_eq!(block.selected_environment, "qa");
    }
}
