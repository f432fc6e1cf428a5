#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
//! End-to-end tests for the `provision` binary.
//!
//! Manifests here only manage files and directories inside a temporary
//! workspace, so nothing needs privileges and the real host is untouched.
//! `apply` is exercised in dry-run mode or against an already converged
//! manifest only.

mod common;

use common::{ManifestBuilder, ManifestContext};

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn converged() -> ManifestContext {
    ManifestBuilder::new()
        .manifest(
            r#"
[[resource]]
id = "data-dir"
kind = "directory"
target = "{{ host }}/data"

[[resource]]
id = "greeting"
kind = "file"
target = "{{ host }}/data/greeting.txt"
content = "hello\n"
depends_on = ["data-dir"]
"#,
        )
        .with_host_dir("data")
        .with_host_file("data/greeting.txt", "hello\n")
        .build()
}

fn pending() -> ManifestContext {
    ManifestBuilder::new()
        .manifest(
            r#"
[[resource]]
id = "notes"
kind = "file"
target = "{{ host }}/notes.txt"
content = "remember the milk\n"
"#,
        )
        .build()
}

fn cycle() -> ManifestContext {
    ManifestBuilder::new()
        .manifest(
            r#"
[[resource]]
id = "a"
kind = "directory"
target = "{{ host }}/a"
depends_on = ["b"]

[[resource]]
id = "b"
kind = "directory"
target = "{{ host }}/b"
depends_on = ["a"]
"#,
        )
        .build()
}

#[test]
fn version_prints_name() {
    let ctx = converged();
    let output = ctx.run(&["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("provision "));
}

#[test]
fn completions_emit_script() {
    let ctx = converged();
    let output = ctx.run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("provision"));
}

#[test]
fn check_accepts_valid_manifest() {
    let ctx = converged();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["check", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("2 entries"), "{output:?}");
}

#[test]
fn check_rejects_cycle_with_validation_status() {
    let ctx = cycle();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["check", manifest.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("cycle"));
}

#[test]
fn apply_rejects_invalid_manifest_before_acting() {
    let ctx = cycle();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["apply", manifest.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    assert!(!ctx.host_path("a").exists());
    assert!(!ctx.host_path("b").exists());
}

#[test]
fn missing_manifest_is_a_validation_failure() {
    let ctx = converged();
    let missing = ctx.root_path().join("nope.toml");
    let output = ctx.run(&["check", missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
}

#[test]
fn malformed_var_is_a_usage_error() {
    let ctx = converged();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["check", manifest.to_str().unwrap(), "--var", "novalue"]);
    assert_eq!(output.status.code(), Some(2), "{output:?}");
}

#[test]
fn plan_json_is_empty_for_converged_host() {
    let ctx = converged();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["plan", "--json", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["actions"].as_array().unwrap().len(), 0);
}

#[test]
fn plan_json_lists_pending_write() {
    let ctx = pending();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["plan", "--json", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let actions = json["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["entry"], "notes");
    assert_eq!(actions[0]["action"], "write_file");
    assert!(!ctx.host_path("notes.txt").exists());
}

#[test]
fn plan_text_names_action() {
    let ctx = pending();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["plan", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("[notes] write"), "{output:?}");
}

#[test]
fn dry_run_leaves_host_untouched() {
    let ctx = pending();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["apply", "--dry-run", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("[DRY RUN]"), "{output:?}");
    assert!(!ctx.host_path("notes.txt").exists());
}

#[test]
fn apply_on_converged_host_does_nothing() {
    let ctx = converged();
    let manifest = ctx.manifest_path();
    let output = ctx.run(&["apply", manifest.to_str().unwrap()]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("nothing to do"), "{output:?}");
    assert_eq!(
        std::fs::read_to_string(ctx.host_path("data/greeting.txt")).unwrap(),
        "hello\n"
    );
}
