//! Builds change-event trees from debounced path changes

use std::collections::BTreeSet;
use std::path::Path;

use grove_core::{
    RecordedChange, ResourceChange, ResourceDelta, ResourceFlags, ResourceKind, ResourcePath,
};
use tracing::debug;

use crate::debounce::{ChangeKind, PendingChanges};
use crate::workspace::FsWorkspace;

/// Translates one debounced batch into a change-event tree rooted at the
/// workspace root.
///
/// Top-level directories are projects (containers), everything below is a
/// leaf unless it is a directory on disk. Paths outside the workspace,
/// ignored paths and changes inside closed projects are dropped.
pub fn translate(workspace: &FsWorkspace, pending: PendingChanges) -> ResourceDelta {
    let PendingChanges {
        mut changes,
        renames,
    } = pending;
    let mut batch = ResourceDelta::root();

    for (from, to) in renames {
        if changes.get(&from) != Some(&ChangeKind::Removed)
            || changes.get(&to) != Some(&ChangeKind::Created)
        {
            continue;
        }
        let Some((old, new, kind)) = move_pair(workspace, &from, &to) else {
            continue;
        };
        changes.remove(&from);
        changes.remove(&to);
        debug!("move {} -> {}", old, new);
        batch.record(
            RecordedChange::new(old.clone(), kind, ResourceChange::Removed).moved_to(new.clone()),
        );
        batch.record(RecordedChange::new(new, kind, ResourceChange::Added).moved_from(old));
    }

    let resources: Vec<(ResourcePath, &Path, ChangeKind)> = changes
        .iter()
        .filter_map(|(local, kind)| {
            let path = workspace.resource_path(local)?;
            (!path.is_root() && !workspace.is_ignored(&path)).then_some((path, local.as_path(), *kind))
        })
        .collect();

    // Projects created or removed in this batch; their description changes
    // are implied.
    let replaced: BTreeSet<&ResourcePath> = resources
        .iter()
        .filter(|(path, _, kind)| path.depth() == 1 && *kind != ChangeKind::Modified)
        .map(|(path, _, _)| path)
        .collect();

    for (path, local, kind) in &resources {
        if let Some(change) = classify(workspace, path, local, *kind, &replaced) {
            batch.record(change);
        }
    }
    batch
}

fn classify(
    workspace: &FsWorkspace,
    path: &ResourcePath,
    local: &Path,
    kind: ChangeKind,
    replaced: &BTreeSet<&ResourcePath>,
) -> Option<RecordedChange> {
    let project = path.segments().first()?;

    if path.depth() == 1 {
        return match kind {
            ChangeKind::Created => local
                .is_dir()
                .then(|| RecordedChange::new(path.clone(), ResourceKind::Container, ResourceChange::Added)),
            ChangeKind::Removed => {
                workspace.forget_project(project);
                Some(RecordedChange::new(
                    path.clone(),
                    ResourceKind::Container,
                    ResourceChange::Removed,
                ))
            }
            ChangeKind::Modified => None,
        };
    }

    if workspace.is_closed(project) {
        return None;
    }

    if path.depth() == 2 && path.name() == Some(workspace.config().nature_marker.as_str()) {
        let project_path = path.parent()?;
        if replaced.contains(&project_path) {
            return None;
        }
        return Some(
            RecordedChange::new(project_path, ResourceKind::Container, ResourceChange::Changed)
                .flags(ResourceFlags::DESCRIPTION),
        );
    }

    match kind {
        ChangeKind::Created => {
            let resource_kind = if local.is_dir() {
                ResourceKind::Container
            } else {
                ResourceKind::Leaf
            };
            Some(RecordedChange::new(path.clone(), resource_kind, ResourceChange::Added))
        }
        ChangeKind::Modified => local.is_file().then(|| {
            RecordedChange::new(path.clone(), ResourceKind::Leaf, ResourceChange::Changed)
                .flags(ResourceFlags::CONTENT)
        }),
        ChangeKind::Removed => Some(RecordedChange::new(
            path.clone(),
            ResourceKind::Leaf,
            ResourceChange::Removed,
        )),
    }
}

/// Store paths and resource kind of a rename, when both legs are visible
/// and at the same level of the tree.
fn move_pair(
    workspace: &FsWorkspace,
    from: &Path,
    to: &Path,
) -> Option<(ResourcePath, ResourcePath, ResourceKind)> {
    let old = workspace.resource_path(from)?;
    let new = workspace.resource_path(to)?;
    if old.is_root() || new.is_root() || workspace.is_ignored(&old) || workspace.is_ignored(&new) {
        return None;
    }
    if old.depth() == 1 && new.depth() == 1 {
        return to.is_dir().then_some((old, new, ResourceKind::Container));
    }
    if old.depth() == 1 || new.depth() == 1 {
        return None;
    }
    let accessible = |path: &ResourcePath| {
        path.segments()
            .first()
            .is_some_and(|project| !workspace.is_closed(project))
    };
    if !accessible(&old) || !accessible(&new) {
        return None;
    }
    let kind = if to.is_dir() {
        ResourceKind::Container
    } else {
        ResourceKind::Leaf
    };
    Some((old, new, kind))
}
