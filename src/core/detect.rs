//! Deployment platform detection.
//!
//! Detects the CI platform a run is executing on from its environment and
//! carries the per-platform variable names the rest of the crate needs.

use std::fmt;
use std::str::FromStr;

use crate::core::snapshot::EnvSnapshot;

/// Supported deployment platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Netlify,
    Vercel,
}

impl Platform {
    /// All supported platforms, in detection order.
    pub const ALL: [Platform; 2] = [Platform::Netlify, Platform::Vercel];

    /// Detect the platform a build is running on.
    ///
    /// Netlify sets `NETLIFY=true`; Vercel sets `VERCEL=1`.
    pub fn detect(snapshot: &EnvSnapshot) -> Option<Self> {
        if snapshot.flag("NETLIFY") {
            return Some(Self::Netlify);
        }
        if snapshot.flag("VERCEL") {
            return Some(Self::Vercel);
        }
        None
    }

    /// Lower-case identifier used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Netlify => "netlify",
            Self::Vercel => "vercel",
        }
    }

    /// Display name for user-facing messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Netlify => "Netlify",
            Self::Vercel => "Vercel",
        }
    }

    /// Variables that may carry the platform API token, preferred first.
    pub fn token_vars(&self) -> &'static [&'static str] {
        match self {
            Self::Netlify => &["NETLIFY_AUTH_TOKEN", "NETLIFY_API_TOKEN"],
            Self::Vercel => &["VERCEL_AUTH_TOKEN", "VERCEL_TOKEN"],
        }
    }

    /// Canonical token variable, used in diagnostics.
    pub fn token_var(&self) -> &'static str {
        self.token_vars()[0]
    }

    /// Find the platform token in a snapshot.
    pub fn token<'a>(&self, snapshot: &'a EnvSnapshot) -> Option<&'a str> {
        self.token_vars()
            .iter()
            .find_map(|var| snapshot.non_empty(var))
    }

    /// Variable that overrides the API base URL.
    pub fn api_url_var(&self) -> &'static str {
        match self {
            Self::Netlify => "NETLIFY_API_URL",
            Self::Vercel => "VERCEL_API_URL",
        }
    }

    /// Production API base URL.
    pub fn default_api_url(&self) -> &'static str {
        match self {
            Self::Netlify => "https://api.netlify.com",
            Self::Vercel => "https://api.vercel.com",
        }
    }

    /// API base URL after applying the snapshot override.
    pub fn api_url(&self, snapshot: &EnvSnapshot) -> String {
        snapshot
            .non_empty(self.api_url_var())
            .unwrap_or(self.default_api_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// The platform's own deploy context variable, if set.
    ///
    /// Netlify exports `CONTEXT`, Vercel exports `VERCEL_ENV`.
    pub fn deploy_context<'a>(&self, snapshot: &'a EnvSnapshot) -> Option<&'a str> {
        match self {
            Self::Netlify => snapshot.non_empty("CONTEXT"),
            Self::Vercel => snapshot.non_empty("VERCEL_ENV"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netlify" => Ok(Self::Netlify),
            "vercel" => Ok(Self::Vercel),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}
