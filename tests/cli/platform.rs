//! Tests for `secure-run` inside a platform build.

use crate::support::*;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn vault() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;
    let scopes: [(&str, &[(&str, &str)]); 3] = [
        (
            PROD_SCOPE,
            &[("API_URL", "prod-api"), ("BWS_TEST_VAR", "prod-ok"), ("UNUSED", "x")],
        ),
        (DEV_SCOPE, &[("API_URL", "dev-api"), ("BWS_TEST_VAR", "dev-ok")]),
        (LOCAL_SCOPE, &[]),
    ];
    for (scope, pairs) in scopes {
        Mock::given(method("GET"))
            .and(path(format!("/projects/{}/secrets", scope)))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(scope, pairs)))
            .mount(&server)
            .await;
    }
    server
}

fn build(vault: &MockServer) -> Test {
    let t = Test::project()
        .with_env("NETLIFY", "true")
        .with_env("CONTEXT", "production")
        .with_env("SITE_NAME", "web")
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &vault.uri());
    t.write("functions/handler.js", "export default () => process.env.API_URL;\n");
    t
}

#[tokio::test]
async fn test_netlify_build_syncs_then_runs() {
    let vault = vault().await;
    let netlify = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "site-1", "name": "web", "account_id": "acct" }
        ])))
        .mount(&netlify)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/acct/env"))
        .and(query_param("site_id", "site-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "key": "STALE", "values": [{ "context": "all", "value": "old" }] },
            { "key": "TOKEN", "values": [{ "context": "all", "value": "keep-me" }] }
        ])))
        .mount(&netlify)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/accounts/acct/env/STALE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&netlify)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/accounts/acct/env/TOKEN"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&netlify)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/accounts/acct/env"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&netlify)
        .await;

    let t = build(&vault)
        .with_env("NETLIFY_AUTH_TOKEN", "nf-token")
        .with_env("NETLIFY_API_URL", &netlify.uri());

    let output = t.run_shell("echo api=$API_URL env=$BWS_ENV");
    assert_success(&output);
    assert_stdout_contains(&output, "api=prod-api");
    assert_stdout_contains(&output, "env=prod");
    assert_stderr_contains(&output, "Netlify variables synced for web");
    assert_no_bundles(&t);

    let requests = netlify.received_requests().await.unwrap_or_default();
    let created = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("variables were created");
    let body: serde_json::Value = serde_json::from_slice(&created.body).unwrap();
    let keys: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["key"].as_str().unwrap())
        .collect();
    assert!(keys.contains(&"API_URL"));
    assert!(keys.contains(&"BWS_PROJECT"));
    assert!(!keys.contains(&"UNUSED"), "only required names are synced");
}

#[tokio::test]
async fn test_invalid_token_on_platform_is_fatal() {
    let vault = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(401).set_body_string("{\"message\":\"invalid token\"}"))
        .mount(&vault)
        .await;
    let t = build(&vault);

    let output = t.run(&["sh", "-c", "echo should-not-run"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "VAULT ACCESS TOKEN PROBLEM");
    assert_stderr_contains(&output, "BWS_ACCESS_TOKEN is invalid");
    assert_stdout_excludes(&output, "should-not-run");
}

#[test]
fn test_missing_token_on_platform_is_fatal() {
    let t = Test::project()
        .with_env("VERCEL", "1")
        .with_env("SITE_NAME", "web");

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "BWS_ACCESS_TOKEN is not set");
}

#[tokio::test]
async fn test_platform_build_without_site_identifier_is_fatal() {
    let vault = vault().await;
    let t = Test::project()
        .with_env("NETLIFY", "true")
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &vault.uri());

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "SITE_NAME must be set");
}

#[tokio::test]
async fn test_bws_project_does_not_identify_a_netlify_site() {
    let vault = vault().await;
    let t = Test::project()
        .with_env("NETLIFY", "true")
        .with_env("BWS_PROJECT", "web")
        .with_env("BWS_ACCESS_TOKEN", TOKEN)
        .with_env("BWS_API_URL", &vault.uri());

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "SITE_NAME must be set");
}

#[tokio::test]
async fn test_missing_platform_token_is_fatal() {
    let vault = vault().await;
    let t = build(&vault);

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "Netlify auth token missing");
    assert_no_bundles(&t);
}

#[tokio::test]
async fn test_platform_mismatch_is_fatal() {
    let vault = vault().await;
    let t = build(&vault)
        .with_env("NETLIFY", "")
        .with_env("VERCEL", "1")
        .with_env("VERCEL_ENV", "production");

    let output = t.run(&["true"]);
    assert_failure(&output);
    assert_stderr_contains(&output, "is configured for Netlify, not Vercel");
}
