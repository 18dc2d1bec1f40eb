//! Test fixtures and constants.

use serde_json::json;

pub const CONFIG_FILE_NAME: &str = "bwsconfig.json";
pub const REPORT_FILE_NAME: &str = "requiredVars.env";

/// Vault scope ids used across tests.
pub const PROD_SCOPE: &str = "11111111-1111-4111-8111-111111111111";
pub const DEV_SCOPE: &str = "22222222-2222-4222-8222-222222222222";
pub const LOCAL_SCOPE: &str = "33333333-3333-4333-8333-333333333333";

/// A token the mock vault accepts.
pub const TOKEN: &str = "0.test-machine-token";

/// `bwsconfig.json` with one Netlify project named `web`.
pub fn single_project_config() -> String {
    json!({
        "projects": [{
            "projectName": "web",
            "platform": "netlify",
            "vaultProjectIds": { "prod": PROD_SCOPE, "dev": DEV_SCOPE, "local": LOCAL_SCOPE },
            "preserveVars": ["TOKEN"]
        }]
    })
    .to_string()
}

/// A vault secret as the API returns it.
pub fn secret(id: &str, key: &str, value: &str, scope: &str) -> serde_json::Value {
    json!({ "id": id, "key": key, "value": value, "projectId": scope })
}

/// A vault listing for `scope` built from pairs.
pub fn listing(scope: &str, pairs: &[(&str, &str)]) -> serde_json::Value {
    let data: Vec<serde_json::Value> = pairs
        .iter()
        .enumerate()
        .map(|(i, (k, v))| secret(&format!("{}-{}", &scope[..8], i), k, v, scope))
        .collect();
    json!({ "data": data })
}
