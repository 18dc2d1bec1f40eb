//! Tests for error handling and CLI flags.

use crate::support::*;
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_help_lists_the_flags() {
    let t = Test::new();

    t.cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--upload-secrets"))
        .stdout(predicate::str::contains("--scan-only"))
        .stdout(predicate::str::contains("--clearvars"));
}

#[test]
fn test_version_flag() {
    let t = Test::new();

    let output = t.cmd().arg("--version").output().unwrap();
    assert_success(&output);
    assert_stdout_contains(&output, "secure-run");
}

#[test]
fn test_clearvars_without_upload_is_rejected() {
    let t = Test::new();

    t.cmd()
        .arg("--clearvars")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--upload-secrets"));
}

#[tokio::test]
async fn test_missing_config_explains_itself() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    let t = Test::new()
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &server.uri());

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "bwsconfig.json not found");
    assert_stderr_contains(&output, "BWS_CONFIG_PATH");
}

#[tokio::test]
async fn test_unknown_explicit_project_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    let t = Test::project()
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &server.uri())
        .with_env("BWS_PROJECT", "nope");

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "project 'nope' is not configured");
}

#[tokio::test]
async fn test_vault_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/projects/{}/secrets", LOCAL_SCOPE)))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"message\":\"invalid scope\"}"))
        .mount(&server)
        .await;
    let t = Test::project()
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &server.uri());

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "vault responded 400");
}
