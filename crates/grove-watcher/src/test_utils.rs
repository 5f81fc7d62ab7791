//! Test utilities for grove-watcher

use std::sync::Arc;

use grove_core::{ResourceChangeListener, ResourceDelta, ResourceStore};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::workspace::{FsWorkspace, WorkspaceConfig};

pub const A_FOO: &str = "var x;\ndef f(a, b) {}\n";

/// A workspace with one model project:
///
/// ```text
/// P1/.grove
/// P1/a.foo
/// P1/notes.txt
/// ```
pub fn workspace_fixture() -> (TempDir, FsWorkspace) {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("P1");
    std::fs::create_dir(&project).unwrap();
    std::fs::write(project.join(".grove"), "").unwrap();
    std::fs::write(project.join("a.foo"), A_FOO).unwrap();
    std::fs::write(project.join("notes.txt"), "not source").unwrap();
    let workspace = FsWorkspace::open(dir.path(), WorkspaceConfig::default()).unwrap();
    (dir, workspace)
}

/// Records every batch the workspace publishes.
#[derive(Default)]
pub struct BatchLog {
    batches: Mutex<Vec<ResourceDelta>>,
}

impl BatchLog {
    pub fn attach(workspace: &FsWorkspace) -> Arc<BatchLog> {
        let log = Arc::new(BatchLog::default());
        workspace.subscribe(log.clone());
        log
    }

    pub fn take(&self) -> Vec<ResourceDelta> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl ResourceChangeListener for BatchLog {
    fn resource_changed(&self, delta: &ResourceDelta) {
        self.batches.lock().push(delta.clone());
    }
}
