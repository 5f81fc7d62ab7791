//! Typed change trees describing the net effect of one batch on the model

use std::fmt;

use bitflags::bitflags;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::model::Element;

/// What happened to an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaKind {
    Added,
    Removed,
    Changed,
    /// No change of its own; the node only groups affected children.
    None,
}

impl DeltaKind {
    fn symbol(self) -> &'static str {
        match self {
            DeltaKind::Added => "+",
            DeltaKind::Removed => "-",
            DeltaKind::Changed => "*",
            DeltaKind::None => "?",
        }
    }
}

bitflags! {
    /// Detail bits of an element change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DeltaFlags: u32 {
        /// The element's own content changed.
        const CONTENT = 1 << 0;
        /// Children were added, removed or changed.
        const CHILDREN = 1 << 1;
        /// A container was opened or closed.
        const OPEN = 1 << 2;
        /// Container metadata changed.
        const DESCRIPTION = 1 << 3;
        /// A file entered or left working copy mode.
        const WORKING_COPY = 1 << 4;
        /// The persisted form changed while a working copy is active.
        const UNDERLYING_RESOURCE = 1 << 5;
        const MOVED_FROM = 1 << 6;
        const MOVED_TO = 1 << 7;
        /// Retained children changed their relative order.
        const REORDER = 1 << 8;
        /// The delta describes changes below file level.
        const FINE_GRAINED = 1 << 9;
    }
}

/// One node of a change tree.
///
/// Nodes that only group affected children report [`DeltaKind::Changed`] with
/// [`DeltaFlags::CHILDREN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDelta {
    element: Element,
    kind: DeltaKind,
    flags: DeltaFlags,
    moved_from: Option<Element>,
    moved_to: Option<Element>,
    children: Vec<ElementDelta>,
}

impl ElementDelta {
    fn new(element: Element) -> Self {
        ElementDelta {
            element,
            kind: DeltaKind::None,
            flags: DeltaFlags::empty(),
            moved_from: None,
            moved_to: None,
            children: Vec::new(),
        }
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn kind(&self) -> DeltaKind {
        if self.kind == DeltaKind::None && !self.children.is_empty() {
            DeltaKind::Changed
        } else {
            self.kind
        }
    }

    pub fn flags(&self) -> DeltaFlags {
        let mut flags = self.flags;
        if !self.children.is_empty() && matches!(self.kind, DeltaKind::None | DeltaKind::Changed) {
            flags |= DeltaFlags::CHILDREN;
        }
        flags
    }

    /// The element this one was moved from; set on ADDED nodes with `MOVED_FROM`.
    pub fn moved_from_element(&self) -> Option<&Element> {
        self.moved_from.as_ref()
    }

    /// The element this one was moved to; set on REMOVED nodes with `MOVED_TO`.
    pub fn moved_to_element(&self) -> Option<&Element> {
        self.moved_to.as_ref()
    }

    pub fn affected_children(&self) -> &[ElementDelta] {
        &self.children
    }

    pub fn added_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children_of_kind(DeltaKind::Added)
    }

    pub fn removed_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children_of_kind(DeltaKind::Removed)
    }

    pub fn changed_children(&self) -> impl Iterator<Item = &ElementDelta> {
        self.children_of_kind(DeltaKind::Changed)
    }

    fn children_of_kind(&self, kind: DeltaKind) -> impl Iterator<Item = &ElementDelta> {
        self.children.iter().filter(move |c| c.kind() == kind)
    }

    /// Finds the node for `element` in this tree.
    pub fn find(&self, element: &Element) -> Option<&ElementDelta> {
        if &self.element == element {
            return Some(self);
        }
        if !self.element.is_ancestor_of(element) {
            return None;
        }
        self.children.iter().find_map(|c| c.find(element))
    }

    /// Whether the tree carries no change at all.
    pub fn is_empty(&self) -> bool {
        self.kind == DeltaKind::None && self.flags.is_empty() && self.children.is_empty()
    }

    fn has_move(&self) -> bool {
        self.moved_from.is_some() || self.moved_to.is_some()
    }

    fn merge(&mut self, event: Event) {
        use DeltaKind::*;
        match (self.kind, event.kind) {
            (_, None) => {}
            (None, _) => {
                self.kind = event.kind;
                self.flags |= event.flags;
                self.take_moves(event.moved_from, event.moved_to);
                if matches!(event.kind, Added | Removed) {
                    self.children.clear();
                }
            }
            (Changed, Changed) => self.flags |= event.flags,
            (Changed, Added | Removed) => {
                self.kind = event.kind;
                self.flags = event.flags;
                self.moved_from = event.moved_from;
                self.moved_to = event.moved_to;
                self.children.clear();
            }
            (Added, Added) | (Removed, Removed) => {
                self.flags |= event.flags;
                self.take_moves(event.moved_from, event.moved_to);
            }
            // The earlier addition or removal subsumes the change.
            (Added | Removed, Changed) => {}
            (Added, Removed) => {
                if self.has_move() || event.moved_from.is_some() || event.moved_to.is_some() {
                    self.kind = Removed;
                    self.flags |= event.flags;
                    self.take_moves(event.moved_from, event.moved_to);
                } else {
                    *self = ElementDelta::new(self.element.clone());
                }
            }
            (Removed, Added) => {
                self.kind = Changed;
                self.flags |= event.flags | DeltaFlags::CONTENT;
                self.take_moves(event.moved_from, event.moved_to);
            }
        }
    }

    fn take_moves(&mut self, moved_from: Option<Element>, moved_to: Option<Element>) {
        if moved_from.is_some() {
            self.moved_from = moved_from;
        }
        if moved_to.is_some() {
            self.moved_to = moved_to;
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(
            f,
            "{:indent$}{}[{}]: {{",
            "",
            self.element,
            self.kind().symbol(),
            indent = depth * 2
        )?;
        let mut first = true;
        for (name, flag) in self.flags().iter_names() {
            if !first {
                f.write_str(" | ")?;
            }
            first = false;
            f.write_str(name)?;
            let paired = if flag == DeltaFlags::MOVED_FROM {
                self.moved_from.as_ref()
            } else if flag == DeltaFlags::MOVED_TO {
                self.moved_to.as_ref()
            } else {
                Option::None
            };
            if let Some(element) = paired {
                write!(f, "({element})")?;
            }
        }
        f.write_str("}")?;
        for child in &self.children {
            f.write_str("\n")?;
            child.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ElementDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}

impl Serialize for ElementDelta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ElementDelta", 6)?;
        state.serialize_field("element", &self.element)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("flags", &self.flags())?;
        state.serialize_field("moved_from", &self.moved_from)?;
        state.serialize_field("moved_to", &self.moved_to)?;
        state.serialize_field("children", &self.children)?;
        state.end()
    }
}

struct Event {
    kind: DeltaKind,
    flags: DeltaFlags,
    moved_from: Option<Element>,
    moved_to: Option<Element>,
}

impl Event {
    fn new(kind: DeltaKind, flags: DeltaFlags) -> Self {
        Event {
            kind,
            flags,
            moved_from: None,
            moved_to: None,
        }
    }
}

/// Accumulates changes of one batch into a pruned [`ElementDelta`] tree.
///
/// Every recorded element must be the root element or one of its descendants.
/// Changes recorded under an element already added or removed in this batch
/// are absorbed by that ancestor.
#[derive(Debug, Clone)]
pub struct DeltaBuilder {
    root: ElementDelta,
}

impl DeltaBuilder {
    pub fn new(root: Element) -> Self {
        DeltaBuilder {
            root: ElementDelta::new(root),
        }
    }

    pub fn added(&mut self, element: &Element, flags: DeltaFlags) -> &mut Self {
        self.insert(element, Event::new(DeltaKind::Added, flags))
    }

    pub fn removed(&mut self, element: &Element, flags: DeltaFlags) -> &mut Self {
        self.insert(element, Event::new(DeltaKind::Removed, flags))
    }

    /// Records a change of `element`. A change without flags says nothing
    /// and is dropped.
    pub fn changed(&mut self, element: &Element, flags: DeltaFlags) -> &mut Self {
        if flags.is_empty() {
            return self;
        }
        self.insert(element, Event::new(DeltaKind::Changed, flags))
    }

    /// Records that `old` was moved to `new`: a REMOVED node at `old` paired
    /// with an ADDED node at `new`.
    pub fn moved_to(&mut self, new: &Element, old: &Element) -> &mut Self {
        self.removed_leg(old, new);
        self.added_leg(new, old)
    }

    /// Records that `new` was moved from `old`: an ADDED node at `new` paired
    /// with a REMOVED node at `old`.
    pub fn moved_from(&mut self, old: &Element, new: &Element) -> &mut Self {
        self.added_leg(new, old);
        self.removed_leg(old, new)
    }

    fn added_leg(&mut self, new: &Element, old: &Element) -> &mut Self {
        let mut event = Event::new(DeltaKind::Added, DeltaFlags::MOVED_FROM);
        event.moved_from = Some(old.clone());
        self.insert(new, event)
    }

    fn removed_leg(&mut self, old: &Element, new: &Element) -> &mut Self {
        let mut event = Event::new(DeltaKind::Removed, DeltaFlags::MOVED_TO);
        event.moved_to = Some(new.clone());
        self.insert(old, event)
    }

    pub fn delta(&self) -> &ElementDelta {
        &self.root
    }

    pub fn into_delta(self) -> ElementDelta {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn insert(&mut self, element: &Element, event: Event) -> &mut Self {
        if element != &self.root.element && !self.root.element.is_ancestor_of(element) {
            warn!("Ignoring change of {} outside delta root {}", element, self.root.element);
            return self;
        }
        let mut chain: Vec<&Element> = std::iter::once(element)
            .chain(element.ancestors())
            .take_while(|e| *e != &self.root.element)
            .collect();
        chain.reverse();
        insert_at(&mut self.root, &chain, event);
        self
    }
}

fn insert_at(node: &mut ElementDelta, chain: &[&Element], event: Event) {
    let Some((next, rest)) = chain.split_first() else {
        node.merge(event);
        return;
    };
    if matches!(node.kind, DeltaKind::Added | DeltaKind::Removed) {
        return;
    }
    let index = match node.children.iter().position(|c| &c.element == *next) {
        Some(index) => index,
        None => {
            node.children.push(ElementDelta::new((*next).clone()));
            node.children.len() - 1
        }
    };
    insert_at(&mut node.children[index], rest, event);
    if node.children[index].is_empty() {
        node.children.remove(index);
    }
}
