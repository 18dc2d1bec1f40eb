//! Tests for `secure-run --scan-only`.

use crate::support::*;

fn required(t: &Test) -> Vec<String> {
    t.read(REPORT_FILE_NAME)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[test]
fn test_scan_ignores_commented_references() {
    let t = Test::new();
    t.write(
        "functions/handler.js",
        "// process.env.LINE_COMMENT\n/* process.env.BLOCK_COMMENT */\nconst url = process.env.API_URL;\n",
    );
    t.write(
        "apps/web/src/App.vue",
        "<!-- import.meta.env.VITE_HIDDEN -->\n<script>\nconst k = import.meta.env.VITE_KEY;\n</script>\n",
    );

    let output = t.scan_only(&[]);
    assert_success(&output);

    let names = required(&t);
    assert!(names.contains(&"API_URL".to_string()));
    assert!(names.contains(&"VITE_KEY".to_string()));
    for hidden in ["LINE_COMMENT", "BLOCK_COMMENT", "VITE_HIDDEN"] {
        assert!(!names.contains(&hidden.to_string()), "{} should be excluded", hidden);
    }
}

#[test]
fn test_scan_only_given_paths() {
    let t = Test::new();
    t.write("custom/a.ts", "process.env.FROM_CUSTOM");
    t.write("functions/b.ts", "process.env.FROM_DEFAULT");

    let output = t.scan_only(&["custom"]);
    assert_success(&output);

    let names = required(&t);
    assert_eq!(names, vec!["FROM_CUSTOM".to_string()]);
}

#[test]
fn test_scan_skips_ignored_trees() {
    let t = Test::new();
    t.write("functions/ok.js", "process.env.KEPT");
    t.write("functions/node_modules/dep/index.js", "process.env.VENDORED");
    t.write(".gitignore", "functions/generated/\n");
    t.write("functions/generated/out.js", "process.env.GENERATED");

    let output = t.scan_only(&[]);
    assert_success(&output);

    assert_eq!(required(&t), vec!["KEPT".to_string()]);
}

#[test]
fn test_scan_honors_gitignore_globs_and_negation() {
    let t = Test::new();
    t.write(".gitignore", "**/generated/\n*.gen.ts\n!functions/keep.gen.ts\n");
    t.write("functions/ok.js", "process.env.KEPT");
    t.write("functions/v1/generated/client.js", "process.env.GENERATED");
    t.write("packages/sdk/generated/types.ts", "process.env.SDK_GENERATED");
    t.write("functions/types.gen.ts", "process.env.TYPES");
    t.write("functions/keep.gen.ts", "process.env.REINCLUDED");

    let output = t.scan_only(&[]);
    assert_success(&output);

    assert_eq!(required(&t), vec!["KEPT".to_string(), "REINCLUDED".to_string()]);
}

#[test]
fn test_scan_includes_turbo_allowlist() {
    let t = Test::new();
    t.write("functions/a.js", "process.env.FROM_CODE");
    t.write("turbo.json", r#"{"globalEnv":["FROM_TURBO"],"tasks":{"build":{"env":["FROM_TASK"]}}}"#);

    let output = t.scan_only(&[]);
    assert_success(&output);

    let names = required(&t);
    for name in ["FROM_CODE", "FROM_TURBO", "FROM_TASK"] {
        assert!(names.contains(&name.to_string()), "missing {}", name);
    }
}

#[test]
fn test_scan_with_nothing_to_scan_writes_empty_report() {
    let t = Test::new();

    let output = t.scan_only(&[]);
    assert_success(&output);
    assert!(t.path(REPORT_FILE_NAME).exists());
    assert!(required(&t).is_empty());
}
