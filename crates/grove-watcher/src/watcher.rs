//! Filesystem watcher feeding the workspace subscribers

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::debounce::{Debouncer, PendingChanges};
use crate::translate::translate;
use crate::workspace::FsWorkspace;

/// Watches the workspace root recursively and publishes one change-event
/// tree per debounced batch, in order.
pub struct WorkspaceWatcher {
    // Kept alive for as long as events should flow.
    _watcher: RecommendedWatcher,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WorkspaceWatcher {
    /// Starts watching. Must be called from within a tokio runtime.
    pub fn start(workspace: Arc<FsWorkspace>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                // The loop has exited; nothing left to deliver to.
                let _ = event_tx.send(res);
            },
        )?;
        watcher
            .watch(workspace.root(), RecursiveMode::Recursive)
            .with_context(|| format!("Cannot watch {}", workspace.root().display()))?;
        info!("Watching workspace {}", workspace.root().display());

        let window = Duration::from_millis(workspace.config().debounce_ms);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(workspace, event_rx, stop_rx, Debouncer::new(window)));
        Ok(WorkspaceWatcher {
            _watcher: watcher,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Stops watching after delivering any changes still pending.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!("Watcher task failed: {}", e);
        }
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    workspace: Arc<FsWorkspace>,
    mut events: mpsc::UnboundedReceiver<Result<notify::Event, notify::Error>>,
    mut stop: oneshot::Receiver<()>,
    mut debouncer: Debouncer,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Ok(event)) => debouncer.add_event(&event),
                Some(Err(e)) => warn!("Filesystem watch error: {}", e),
                None => break,
            },
            _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                if let Some(pending) = debouncer.take_if_ready() {
                    deliver(&workspace, pending);
                }
            }
            _ = &mut stop => break,
        }
    }
    if let Some(pending) = debouncer.take() {
        deliver(&workspace, pending);
    }
    debug!("Stopped watching {}", workspace.root().display());
}

fn deliver(workspace: &FsWorkspace, pending: PendingChanges) {
    let batch = translate(workspace, pending);
    if batch.is_empty() {
        debug!("Debounced batch had no model-relevant changes");
        return;
    }
    workspace.publish(&batch);
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_utils::{BatchLog, workspace_fixture};

    #[tokio::test]
    async fn test_watcher_starts_and_stops() {
        let (_dir, workspace) = workspace_fixture();
        let watcher = WorkspaceWatcher::start(Arc::new(workspace)).unwrap();
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_file_write_is_published() {
        let (_dir, workspace) = workspace_fixture();
        let workspace = Arc::new(workspace);
        let log = BatchLog::attach(&workspace);
        let watcher = WorkspaceWatcher::start(workspace.clone()).unwrap();

        fs::write(workspace.root().join("P1/a.foo"), "var z;\n").unwrap();

        // OS watchers are best effort; only check what did arrive.
        let mut batches = Vec::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            batches.extend(log.take());
            if !batches.is_empty() {
                break;
            }
        }
        watcher.stop().await;
        batches.extend(log.take());

        for batch in &batches {
            for project in &batch.children {
                assert_eq!(project.path.to_string(), "/P1");
            }
        }
    }
}
