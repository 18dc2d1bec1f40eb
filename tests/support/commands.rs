//! Command helper methods for Test.

use super::Test;
use assert_cmd::Command;
use std::process::{Child, Output, Stdio};

/// Variables scrubbed from the inherited environment so the developer's
/// own shell cannot leak into a test.
const SCRUBBED: &[&str] = &[
    "BWS_ACCESS_TOKEN",
    "BWS_PROJECT",
    "BWS_ENV",
    "BWS_PROJECT_ID",
    "BWS_EPHEMERAL_KEY",
    "BWS_SECURE_RUN_ACTIVE",
    "BWS_API_URL",
    "BWS_ORG_ID",
    "BWS_CONFIG_PATH",
    "BWS_SUPPRESS_ALL",
    "NETLIFY",
    "CONTEXT",
    "NETLIFY_AUTH_TOKEN",
    "NETLIFY_API_TOKEN",
    "NETLIFY_API_URL",
    "VERCEL",
    "VERCEL_ENV",
    "VERCEL_AUTH_TOKEN",
    "VERCEL_TOKEN",
    "VERCEL_API_URL",
    "SITE_NAME",
    "DEBUG",
    "SHOW_DECRYPTED",
    "SECURE_RUN_LOG",
];

impl Test {
    /// Create a secure-run command with an isolated environment.
    ///
    /// Returns a Command configured with:
    /// - HOME set to the temporary home directory
    /// - Current directory set to the test project directory
    /// - NO_COLOR and BWS_NO_OVERRIDE set
    /// - the test's extra variables
    pub fn cmd(&self) -> Command {
        Command::from_std(self.std_cmd())
    }

    /// The same isolated command as a plain `std::process::Command`.
    pub fn std_cmd(&self) -> std::process::Command {
        #[allow(deprecated)]
        let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("secure-run"));
        for var in SCRUBBED {
            cmd.env_remove(var);
        }
        cmd.env("HOME", self.home.path());
        cmd.env("USERPROFILE", self.home.path());
        cmd.env("NO_COLOR", "1");
        cmd.env("BWS_NO_OVERRIDE", "true");
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd.current_dir(self.dir.path());
        cmd
    }

    /// Shortcut for `secure-run <command...>`.
    pub fn run(&self, command: &[&str]) -> Output {
        self.cmd()
            .args(command)
            .output()
            .expect("failed to run secure-run")
    }

    /// Start `secure-run <command...>` without waiting for it.
    pub fn spawn(&self, command: &[&str]) -> Child {
        self.std_cmd()
            .args(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start secure-run")
    }

    /// Shortcut for `secure-run "<shell line>"`.
    pub fn run_shell(&self, line: &str) -> Output {
        self.run(&[line])
    }

    /// Shortcut for `secure-run --scan-only [paths...]`.
    pub fn scan_only(&self, paths: &[&str]) -> Output {
        self.cmd()
            .arg("--scan-only")
            .args(paths)
            .output()
            .expect("failed to run secure-run --scan-only")
    }

    /// Shortcut for `secure-run --upload-secrets [--clearvars]`.
    pub fn upload(&self, clear: bool) -> Output {
        let mut cmd = self.cmd();
        cmd.arg("--upload-secrets");
        if clear {
            cmd.arg("--clearvars");
        }
        cmd.output().expect("failed to run secure-run --upload-secrets")
    }
}
