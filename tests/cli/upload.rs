//! Tests for `secure-run --upload-secrets`.

use crate::support::*;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn upload_file(scope: &str) -> String {
    format!(".env.bws.{}", scope)
}

async fn accepting_vault(scope: &str, expected: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{}/secrets", scope)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(secret("new-id", "KEY", "value", scope)),
        )
        .expect(expected)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_upload_creates_every_secret() {
    let server = accepting_vault(DEV_SCOPE, 1).await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{}/secrets", DEV_SCOPE)))
        .and(body_partial_json(serde_json::json!({ "key": "DERIVED", "value": "base-suffix" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(secret("d", "DERIVED", "base-suffix", DEV_SCOPE)),
        )
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;

    let t = Test::new()
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &server.uri());
    t.write(
        &upload_file(DEV_SCOPE),
        "BASE=base\nDERIVED=${BASE}-suffix\nBWS_ACCESS_TOKEN=never-uploaded\n",
    );

    let output = t.upload(false);
    assert_success(&output);
    assert_stderr_contains(&output, "SUCCESS! 1 of 1 file(s) uploaded correctly.");
    assert_stderr_contains(&output, "Skipped sensitive keys");
}

#[tokio::test]
async fn test_failed_secret_fails_the_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/projects/{}/secrets", PROD_SCOPE)))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"message\":\"duplicate key\"}"))
        .mount(&server)
        .await;

    let t = Test::new()
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &server.uri());
    t.write(&upload_file(PROD_SCOPE), "ONLY=one\n");

    let output = t.upload(false);
    assert_failure(&output);
    assert_stderr_contains(&output, "FAILED: 1 of 1 file(s) had errors.");
    assert_stderr_contains(&output, "duplicate key");
}

#[tokio::test]
async fn test_token_from_dotenv_is_used() {
    let server = accepting_vault(LOCAL_SCOPE, 1).await;
    let t = Test::new().with_env("BWS_API_URL", &server.uri());
    t.write(".env", &format!("BWS_ACCESS_TOKEN={}\n", TOKEN));
    t.write(&upload_file(LOCAL_SCOPE), "KEY=value\n");

    let output = t.upload(false);
    assert_success(&output);
}

#[test]
fn test_invalid_scope_file_name_is_rejected() {
    let t = Test::new().with_env("BWS_ACCESS_TOKEN", TOKEN);
    t.write(".env.bws.not-a-scope", "KEY=value\n");

    let output = t.upload(false);
    assert_failure(&output);
    assert_stderr_contains(&output, "invalid scope id 'not-a-scope'");
}

#[test]
fn test_no_upload_files_is_an_error() {
    let t = Test::new().with_env("BWS_ACCESS_TOKEN", TOKEN);

    let output = t.upload(false);
    assert_failure(&output);
    assert_stderr_contains(&output, "no .env.bws.<scope-id> files found");
}

#[test]
fn test_upload_requires_a_token() {
    let t = Test::new();
    t.write(&upload_file(DEV_SCOPE), "KEY=value\n");

    let output = t.upload(false);
    assert_failure(&output);
    assert_stderr_contains(&output, "BWS_ACCESS_TOKEN is not set");
}
