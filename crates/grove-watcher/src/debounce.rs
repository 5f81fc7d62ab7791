//! Coalesces raw filesystem events into batches

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Changes collected during one quiet period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub changes: BTreeMap<PathBuf, ChangeKind>,
    /// Rename pairs `(from, to)` reported by the backend. A pair only
    /// counts as a move when `from` ended up removed and `to` created.
    pub renames: Vec<(PathBuf, PathBuf)>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.renames.is_empty()
    }
}

/// Timing and deduplication only. Knows nothing about projects or files.
pub struct Debouncer {
    window: Duration,
    pending: PendingChanges,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: PendingChanges::default(),
            last_event: None,
        }
    }

    pub fn add_event(&mut self, event: &Event) {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            // mtime/chmod noise
            EventKind::Modify(ModifyKind::Metadata(_)) => return,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.add_rename(from.clone(), to.clone());
                }
                return;
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Backends that cannot tell the two legs apart.
                for path in &event.paths {
                    let kind = if path.exists() {
                        ChangeKind::Created
                    } else {
                        ChangeKind::Removed
                    };
                    self.add(path.clone(), kind);
                }
                return;
            }
            EventKind::Modify(_) => ChangeKind::Modified,
            _ => return,
        };
        for path in &event.paths {
            self.add(path.clone(), kind);
        }
    }

    /// Records one change, applying the dedup rules:
    /// - Removed then Created/Modified: the path was restored, Modified
    /// - Created then Removed: appeared and vanished, discarded
    /// - Modified then Removed: Removed
    /// - anything else: first event wins
    pub fn add(&mut self, path: PathBuf, kind: ChangeKind) {
        if is_temp_file(&path) {
            return;
        }
        self.last_event = Some(Instant::now());
        let Some(&existing) = self.pending.changes.get(&path) else {
            debug!("event {:?}: {}", kind, path.display());
            self.pending.changes.insert(path, kind);
            return;
        };
        match (existing, kind) {
            (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                debug!("restore removed->modified: {}", path.display());
                self.pending.changes.insert(path, ChangeKind::Modified);
            }
            (ChangeKind::Created, ChangeKind::Removed) => {
                debug!("discard created+removed: {}", path.display());
                self.pending.changes.remove(&path);
            }
            (ChangeKind::Modified, ChangeKind::Removed) => {
                self.pending.changes.insert(path, ChangeKind::Removed);
            }
            _ => {}
        }
    }

    /// Records a rename and its two legs.
    pub fn add_rename(&mut self, from: PathBuf, to: PathBuf) {
        self.add(from.clone(), ChangeKind::Removed);
        self.add(to.clone(), ChangeKind::Created);
        if is_temp_file(&from) || is_temp_file(&to) {
            return;
        }
        debug!("rename {} -> {}", from.display(), to.display());
        self.pending.renames.push((from, to));
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the quiet period since the last event has elapsed.
    pub fn is_ready(&self) -> bool {
        self.last_event
            .is_some_and(|last| last.elapsed() >= self.window && !self.pending.is_empty())
    }

    /// Takes the pending changes once the quiet period has elapsed.
    pub fn take_if_ready(&mut self) -> Option<PendingChanges> {
        if !self.is_ready() {
            return None;
        }
        self.take()
    }

    /// Takes the pending changes regardless of timing.
    pub fn take(&mut self) -> Option<PendingChanges> {
        self.last_event = None;
        let pending = std::mem::take(&mut self.pending);
        (!pending.is_empty()).then_some(pending)
    }

    /// Time until the pending changes may become ready.
    pub fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };
        self.window
            .saturating_sub(last_event.elapsed())
            .max(Duration::from_millis(1))
    }
}

/// Editor swap and backup files.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp") || name.ends_with('~')
}
