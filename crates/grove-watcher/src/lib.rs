//! Grove Watcher: filesystem-backed resource store and change watching

pub mod workspace;
pub mod debounce;
pub mod translate;
pub mod watcher;
pub mod stream;


#[cfg(test)]
pub mod test_utils;

pub use workspace::{DEFAULT_NATURE_MARKER, FsWorkspace, WorkspaceConfig};
pub use debounce::{ChangeKind, Debouncer, PendingChanges};
pub use translate::translate;
pub use watcher::WorkspaceWatcher;
pub use stream::DeltaStream;
