//! Fine-grained deltas between two structures of the same file

use std::collections::HashSet;

use crate::delta::{DeltaBuilder, DeltaFlags};
use crate::model::Element;
use crate::structure::FileStructure;

/// Describes how `new` differs from `old` below `file`.
///
/// Children present on one side only are ADDED or REMOVED. Retained children
/// are CHANGED with `CONTENT` when their attributes differ in anything but
/// their ranges, and with `REORDER` when their position among the retained
/// children moved. A non-empty result marks the file itself `FINE_GRAINED`.
pub fn structure_delta(file: &Element, old: &FileStructure, new: &FileStructure) -> DeltaBuilder {
    let mut builder = DeltaBuilder::new(file.clone());
    let old_children = old.body.children();
    let new_children = new.body.children();
    let old_set: HashSet<&Element> = old_children.iter().collect();
    let new_set: HashSet<&Element> = new_children.iter().collect();

    for child in old_children.iter().filter(|c| !new_set.contains(c)) {
        builder.removed(child, DeltaFlags::empty());
    }
    for child in new_children.iter().filter(|c| !old_set.contains(c)) {
        builder.added(child, DeltaFlags::empty());
    }

    let old_retained: Vec<&Element> = old_children.iter().filter(|c| new_set.contains(c)).collect();
    let new_retained: Vec<&Element> = new_children.iter().filter(|c| old_set.contains(c)).collect();
    for (position, child) in new_retained.iter().enumerate() {
        let mut flags = DeltaFlags::empty();
        match (old.attributes_of(child), new.attributes_of(child)) {
            (Some(before), Some(after)) if before.content_differs(after) => {
                flags |= DeltaFlags::CONTENT
            }
            _ => {}
        }
        if old_retained.get(position) != Some(child) {
            flags |= DeltaFlags::REORDER;
        }
        if !flags.is_empty() {
            builder.changed(child, flags);
        }
    }

    if !builder.is_empty() {
        builder.changed(file, DeltaFlags::CONTENT | DeltaFlags::FINE_GRAINED);
    }
    builder
}
