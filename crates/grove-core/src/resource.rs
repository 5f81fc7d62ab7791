//! Interfaces to the external resource store and its change-event trees

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Absolute path of a resource in the store, e.g. `/P1/a.foo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The workspace root (`/`).
    pub fn root() -> Self {
        ResourcePath::default()
    }

    /// Parses a `/`-separated path; empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        ResourcePath {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        ResourcePath { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments; 0 for the root, 1 for top-level containers.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<ResourcePath> {
        if self.is_root() {
            return None;
        }
        Some(ResourcePath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `self` equals `other` or contains it.
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Extension of the last segment, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty()).then_some(ext)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Kind of resource a change-event node refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Root,
    Container,
    Leaf,
}

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceChange {
    Added,
    Removed,
    Changed,
}

bitflags! {
    /// Detail bits attached to a resource change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ResourceFlags: u32 {
        const CONTENT = 1 << 0;
        const MOVED_FROM = 1 << 1;
        const MOVED_TO = 1 << 2;
        const OPEN = 1 << 3;
        const TYPE = 1 << 4;
        const SYNC = 1 << 5;
        const MARKERS = 1 << 6;
        const REPLACED = 1 << 7;
        const DESCRIPTION = 1 << 8;
        const ENCODING = 1 << 9;
    }
}

impl ResourceFlags {
    /// Bits that never indicate a change of content.
    pub const COSMETIC: ResourceFlags = ResourceFlags::MARKERS.union(ResourceFlags::SYNC);
}

/// One node of a change-event tree delivered by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub path: ResourcePath,
    pub kind: ResourceKind,
    pub change: ResourceChange,
    pub flags: ResourceFlags,
    pub moved_from: Option<ResourcePath>,
    pub moved_to: Option<ResourcePath>,
    pub children: Vec<ResourceDelta>,
}

impl ResourceDelta {
    pub fn new(path: ResourcePath, kind: ResourceKind, change: ResourceChange) -> Self {
        ResourceDelta {
            path,
            kind,
            change,
            flags: ResourceFlags::empty(),
            moved_from: None,
            moved_to: None,
            children: Vec::new(),
        }
    }

    /// An empty batch rooted at the workspace root.
    pub fn root() -> Self {
        ResourceDelta::new(ResourcePath::root(), ResourceKind::Root, ResourceChange::Changed)
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ResourceKind::Root && self.children.is_empty()
    }

    /// Finds the node for `path` in this tree.
    pub fn find(&self, path: &ResourcePath) -> Option<&ResourceDelta> {
        if &self.path == path {
            return Some(self);
        }
        self.children
            .iter()
            .filter(|c| c.path.is_prefix_of(path))
            .find_map(|c| c.find(path))
    }

    /// Records a change at `path`, creating CHANGED container nodes for the
    /// intermediate paths. A second record for the same path overwrites the
    /// change kind and ORs in the flags.
    pub fn record(&mut self, change: RecordedChange) {
        debug_assert!(self.path.is_prefix_of(&change.path));
        if change.path == self.path {
            self.change = change.change;
            self.kind = change.kind;
            self.flags |= change.flags;
            if change.moved_from.is_some() {
                self.moved_from = change.moved_from;
            }
            if change.moved_to.is_some() {
                self.moved_to = change.moved_to;
            }
            return;
        }

        let next = ResourcePath {
            segments: change.path.segments[..self.path.depth() + 1].to_vec(),
        };
        let index = match self.children.iter().position(|c| c.path == next) {
            Some(index) => index,
            None => {
                let kind = if next == change.path {
                    change.kind
                } else {
                    ResourceKind::Container
                };
                self.children
                    .push(ResourceDelta::new(next, kind, ResourceChange::Changed));
                self.children.len() - 1
            }
        };
        self.children[index].record(change);
    }

    /// Visits this tree top-down. A visitor error stops descent into that
    /// subtree only; traversal continues with the siblings.
    pub fn accept<V: ResourceDeltaVisitor + ?Sized>(&self, visitor: &mut V) {
        match visitor.visit(self) {
            Ok(true) => {
                for child in &self.children {
                    child.accept(visitor);
                }
            }
            Ok(false) => {}
            Err(err) => {
                warn!("Skipping change subtree {}: {:#}", self.path, err);
            }
        }
    }
}

/// Input for [`ResourceDelta::record`].
#[derive(Debug, Clone)]
pub struct RecordedChange {
    pub path: ResourcePath,
    pub kind: ResourceKind,
    pub change: ResourceChange,
    pub flags: ResourceFlags,
    pub moved_from: Option<ResourcePath>,
    pub moved_to: Option<ResourcePath>,
}

impl RecordedChange {
    pub fn new(path: ResourcePath, kind: ResourceKind, change: ResourceChange) -> Self {
        RecordedChange {
            path,
            kind,
            change,
            flags: ResourceFlags::empty(),
            moved_from: None,
            moved_to: None,
        }
    }

    pub fn flags(mut self, flags: ResourceFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn moved_from(mut self, from: ResourcePath) -> Self {
        self.flags |= ResourceFlags::MOVED_FROM;
        self.moved_from = Some(from);
        self
    }

    pub fn moved_to(mut self, to: ResourcePath) -> Self {
        self.flags |= ResourceFlags::MOVED_TO;
        self.moved_to = Some(to);
        self
    }
}

/// Depth-controlled visitor over a change-event tree.
pub trait ResourceDeltaVisitor {
    /// Returns whether to descend into the children of `delta`.
    fn visit(&mut self, delta: &ResourceDelta) -> anyhow::Result<bool>;
}

/// Status of a top-level container as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub open: bool,
    /// Whether the container carries the marker that makes it a model project.
    /// Only meaningful while open.
    pub qualifies: bool,
}

impl ProjectInfo {
    pub fn is_model_project(&self) -> bool {
        self.open && self.qualifies
    }
}

/// Receives one change-event tree per mutation batch.
pub trait ResourceChangeListener: Send + Sync {
    fn resource_changed(&self, delta: &ResourceDelta);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The external hierarchical store mirrored by the model.
pub trait ResourceStore: Send + Sync {
    /// All top-level containers with their status.
    fn projects(&self) -> anyhow::Result<Vec<ProjectInfo>>;

    /// Status of one top-level container, or `None` if it does not exist.
    fn project(&self, name: &str) -> anyhow::Result<Option<ProjectInfo>>;

    /// Names of the leaves directly inside an open container.
    fn members(&self, project: &str) -> anyhow::Result<Vec<String>>;

    /// Whether a resource exists at `path`.
    fn exists(&self, path: &ResourcePath) -> bool;

    /// Reads the persisted contents of a leaf.
    fn read(&self, path: &ResourcePath) -> anyhow::Result<String>;

    fn subscribe(&self, listener: Arc<dyn ResourceChangeListener>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Subscriber registry shared by store implementations.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn ResourceChangeListener>)>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ResourceChangeListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove(&self, id: SubscriptionId) {
        self.listeners.write().retain(|(existing, _)| *existing != id);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers a batch to every subscriber in registration order.
    /// Empty batches are dropped.
    pub fn dispatch(&self, delta: &ResourceDelta) {
        if delta.is_empty() {
            return;
        }
        let listeners: Vec<_> = self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.resource_changed(delta);
        }
    }
}
