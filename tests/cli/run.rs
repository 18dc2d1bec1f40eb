//! Tests for `secure-run <command...>` on a developer machine.

use crate::support::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A vault that accepts [`TOKEN`] and serves `local` for the local scope.
async fn vault_with(local: &[(&str, &str)]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/projects/{}/secrets", LOCAL_SCOPE)))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(LOCAL_SCOPE, local)))
        .mount(&server)
        .await;
    for scope in [DEV_SCOPE, PROD_SCOPE] {
        Mock::given(method("GET"))
            .and(path(format!("/projects/{}/secrets", scope)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(listing(scope, &[("API_URL", "remote")])),
            )
            .mount(&server)
            .await;
    }
    server
}

fn with_vault(t: Test, server: &MockServer) -> Test {
    t.with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &server.uri())
}

#[test]
fn test_missing_token_runs_with_dotenv_only() {
    let t = Test::new();
    t.write(".env", "GREETING=hello\n");

    let output = t.run_shell("echo greeting=$GREETING");
    assert_success(&output);
    assert_stdout_contains(&output, "greeting=hello");
    assert_stderr_contains(&output, "BWS_ACCESS_TOKEN is not set");
    assert_no_bundles(&t);
}

#[test]
fn test_missing_token_box_links_the_organization() {
    let t = Test::new().with_env("BWS_ORG_ID", "org-123");

    let output = t.run(&["true"]);
    assert_success(&output);
    assert_stderr_contains(&output, "Continuing with local .env values only.");
    assert_stderr_contains(&output, "org-123");
}

#[test]
fn test_exit_code_passthrough() {
    let t = Test::new();

    let output = t.run(&["sh", "-c", "exit 42"]);
    assert_eq!(output.status.code(), Some(42));
}

#[test]
fn test_no_command_warns_and_succeeds() {
    let t = Test::new();

    let output = t.cmd().output().unwrap();
    assert_success(&output);
    assert_stderr_contains(&output, "no command provided");
}

#[test]
fn test_unknown_program_fails() {
    let t = Test::new();

    let output = t.run(&["definitely-not-a-real-program-xyz"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "command not found");
}

#[test]
fn test_nested_run_skips_the_pipeline() {
    let t = Test::new()
        .with_env("BWS_SECURE_RUN_ACTIVE", "true")
        .with_env("INHERITED", "from-parent");

    let output = t.run_shell("echo inherited=$INHERITED");
    assert_success(&output);
    assert_stdout_contains(&output, "inherited=from-parent");
    assert!(!t.path(REPORT_FILE_NAME).exists(), "nested run must not scan");
}

#[test]
fn test_suppressed_output_keeps_command_output() {
    let t = Test::new().with_env("BWS_SUPPRESS_ALL", "true");

    let output = t.run_shell("echo still-here");
    assert_success(&output);
    assert_stdout_contains(&output, "still-here");
    assert!(
        !stderr(&output).contains("Continuing with local .env values only."),
        "warning boxes are muted"
    );
}

#[tokio::test]
async fn test_vault_secrets_reach_the_command() {
    let server = vault_with(&[("VAULT_VAR", "from-vault"), ("BWS_TEST_VAR", "ok")]).await;
    let t = with_vault(Test::project(), &server);

    let output = t.run_shell(
        "echo vault=$VAULT_VAR project=$BWS_PROJECT env=$BWS_ENV active=$BWS_SECURE_RUN_ACTIVE",
    );
    assert_success(&output);
    assert_stdout_contains(&output, "vault=from-vault");
    assert_stdout_contains(&output, "project=web");
    assert_stdout_contains(&output, "env=local");
    assert_stdout_contains(&output, "active=true");
    assert_no_bundles(&t);

    let dotenv = t.read(".env");
    assert!(dotenv.contains("# === BEGIN BWS PROJECT CONFIGURATION ==="));
    assert!(dotenv.contains("\nBWS_PROJECT=web\n"));
    assert!(dotenv.contains("\nBWS_ENV=local  # For local development\n"));
}

#[tokio::test]
async fn test_caller_environment_beats_vault_and_dotenv() {
    let server = vault_with(&[("API_URL", "from-vault"), ("BWS_TEST_VAR", "ok")]).await;
    let t = with_vault(Test::project(), &server).with_env("API_URL", "from-caller");
    t.write(".env", "API_URL=from-dotenv\nLOCAL_ONLY=yes\n");

    let output = t.run_shell("echo api=$API_URL local=$LOCAL_ONLY");
    assert_success(&output);
    assert_stdout_contains(&output, "api=from-caller");
    assert_stdout_contains(&output, "local=yes");
}

#[tokio::test]
async fn test_dotenv_beats_vault() {
    let server = vault_with(&[("API_URL", "from-vault"), ("BWS_TEST_VAR", "ok")]).await;
    let t = with_vault(Test::project(), &server);
    t.write(".env", "API_URL=from-dotenv\n");

    let output = t.run_shell("echo api=$API_URL");
    assert_success(&output);
    assert_stdout_contains(&output, "api=from-dotenv");
}

#[tokio::test]
async fn test_missing_control_variable_stops_the_run() {
    let server = vault_with(&[("VAULT_VAR", "v")]).await;
    let t = with_vault(Test::project(), &server);

    let output = t.run(&["sh", "-c", "echo should-not-run"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "control variable missing");
    assert_stderr_contains(&output, "BWS_TEST_VAR");
    assert_stdout_excludes(&output, "should-not-run");
    assert_no_bundles(&t);
}

#[tokio::test]
async fn test_rejected_token_locally_falls_back_to_dotenv() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"message\":\"bad token\"}"))
        .mount(&server)
        .await;
    let t = with_vault(Test::project(), &server);
    t.write(".env", "GREETING=hi\n");

    let output = t.run_shell("echo greeting=$GREETING");
    assert_success(&output);
    assert_stdout_contains(&output, "greeting=hi");
    assert_stderr_contains(&output, "BWS_ACCESS_TOKEN was rejected");
}

#[tokio::test]
async fn test_persisted_selection_is_reused() {
    let server = vault_with(&[("BWS_TEST_VAR", "ok")]).await;
    Mock::given(method("GET"))
        .and(path(format!("/projects/{}/secrets", DEV_SCOPE)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing(DEV_SCOPE, &[("BWS_TEST_VAR", "dev-ok")])),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    let t = with_vault(Test::project(), &server);
    t.write(
        ".env",
        "# === BEGIN BWS PROJECT CONFIGURATION ===\nBWS_PROJECT=web\nBWS_ENV=dev\n# === END BWS PROJECT CONFIGURATION ===\n",
    );

    let output = t.run_shell("echo env=$BWS_ENV control=$BWS_TEST_VAR");
    assert_success(&output);
    assert_stdout_contains(&output, "env=dev");
    assert_stdout_contains(&output, "control=dev-ok");
}

#[tokio::test]
async fn test_sibling_scope_failure_is_only_a_warning() {
    let server = vault_with(&[("BWS_TEST_VAR", "ok")]).await;
    Mock::given(method("GET"))
        .and(path(format!("/projects/{}/secrets", PROD_SCOPE)))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"message\":\"no access\"}"))
        .with_priority(1)
        .mount(&server)
        .await;
    let t = with_vault(Test::project(), &server);

    let output = t.run_shell("echo control=$BWS_TEST_VAR");
    assert_success(&output);
    assert_stdout_contains(&output, "control=ok");
    assert_no_bundles(&t);
}

#[cfg(unix)]
#[tokio::test]
async fn test_sigterm_removes_bundles() {
    use std::time::{Duration, Instant};

    let server = vault_with(&[("BWS_TEST_VAR", "ok")]).await;
    let t = with_vault(Test::project(), &server);

    let mut child = t.spawn(&["sleep", "20"]);
    let deadline = Instant::now() + Duration::from_secs(15);
    while t.bundles().is_empty() {
        assert!(Instant::now() < deadline, "bundles were never written");
        assert!(child.try_wait().unwrap().is_none(), "secure-run exited early");
        std::thread::sleep(Duration::from_millis(50));
    }

    let killed = std::process::Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(143));
    assert_no_bundles(&t);
}
