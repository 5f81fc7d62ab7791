//! Integration tests for Grove
//!
//! These tests drive the CLI binary and the library crates together over a
//! real directory tree.

use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::Duration;

use grove_core::{ChangeEventKind, Element, ModelConfig, ModelManager};
use grove_indexer::FooStructureBuilder;
use grove_watcher::{DeltaStream, FsWorkspace, WorkspaceConfig, WorkspaceWatcher};
use tempfile::TempDir;

/// ```text
/// P1/.grove
/// P1/a.foo
/// P1/b.foo
/// Q/c.foo      (no marker)
/// ```
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let p1 = dir.path().join("P1");
    std::fs::create_dir(&p1).unwrap();
    std::fs::write(p1.join(".grove"), "").unwrap();
    std::fs::write(p1.join("a.foo"), "var x;\ndef f(a, b) {}\n").unwrap();
    std::fs::write(p1.join("b.foo"), "var y;\nvar y;\n").unwrap();
    let q = dir.path().join("Q");
    std::fs::create_dir(&q).unwrap();
    std::fs::write(q.join("c.foo"), "var z;").unwrap();
    dir
}

fn grove(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("Failed to execute grove")
}

#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("version")
        .output()
        .expect("Failed to execute grove");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Grove v"));
}

#[test]
fn test_cli_tree() {
    let dir = workspace();
    let output = grove(dir.path(), &["tree", "--attributes"]);
    assert!(output.status.success());
    insta::assert_snapshot!(String::from_utf8_lossy(&output.stdout), @r"
    P1
      a.foo
        var x  [0..6] name [4..5]
        def f(a, b)  [7..21] name [11..12]
      b.foo
        var y  [0..6] name [4..5]
        var y #2  [7..13] name [11..12]
    ");
}

#[test]
fn test_cli_inspect() {
    let dir = workspace();
    let output = grove(dir.path(), &["inspect", "P1/a.foo"]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["file"], "P1::a.foo");
    let children = report["children"].as_array().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[1]["element"], "P1::a.foo::f/2");
    assert_eq!(children[1]["kind"], "Def");
    assert_eq!(
        children[1]["attributes"]["parameter_names"],
        serde_json::json!(["a", "b"])
    );
}

#[test]
fn test_cli_inspect_missing_file() {
    let dir = workspace();
    let output = grove(dir.path(), &["inspect", "Q/c.foo"]);
    assert!(!output.status.success());

    let output = grove(dir.path(), &["inspect", "no-slash"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Expected <project>/<file>"));
}

#[test]
fn test_cli_config_file() {
    let dir = workspace();
    std::fs::write(
        dir.path().join("grove.toml"),
        "[workspace]\nnature_marker = \"MARKER\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("Q/MARKER"), "").unwrap();
    let output = grove(dir.path(), &["tree"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Q\n  c.foo\n    var z\n"
    );

    std::fs::write(dir.path().join("grove.toml"), "[model]\nbogus = 1\n").unwrap();
    let output = grove(dir.path(), &["tree"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid configuration"));
}

#[test]
fn test_cli_rejects_zero_capacity() {
    let dir = workspace();
    let output = grove(dir.path(), &["--capacity", "0", "tree"]);
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_watcher_drives_the_model() {
    let dir = workspace();
    let config = WorkspaceConfig {
        debounce_ms: 10,
        ..WorkspaceConfig::default()
    };
    let workspace = Arc::new(FsWorkspace::open(dir.path(), config).unwrap());
    let manager = ModelManager::startup(
        workspace.clone(),
        Arc::new(FooStructureBuilder::default()),
        ModelConfig::default(),
    )
    .unwrap();
    let a = Element::project("P1").unwrap().file("a.foo").unwrap();
    assert_eq!(manager.vars(&a).unwrap().len(), 1);

    let mut stream = DeltaStream::attach(&manager);
    let watcher = WorkspaceWatcher::start(workspace.clone()).unwrap();
    std::fs::write(workspace.root().join("P1/a.foo"), "var x;\nvar w;\n").unwrap();

    // OS watchers are best effort; only check what did arrive.
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), stream.recv()).await {
        assert_eq!(event.kind, ChangeEventKind::PostChange);
        assert!(event.delta.find(&a).is_some());
        assert_eq!(manager.vars(&a).unwrap().len(), 2);
    }

    watcher.stop().await;
    manager.shutdown();
    assert_eq!(workspace.subscriber_count(), 0);
}
