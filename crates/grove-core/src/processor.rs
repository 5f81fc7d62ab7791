//! Translation of store change trees into model deltas

use std::collections::HashSet;

use tracing::debug;

use crate::delta::{DeltaBuilder, DeltaFlags};
use crate::manager::ModelManager;
use crate::model::{Element, has_file_extension};
use crate::resource::{
    ResourceChange, ResourceDelta, ResourceDeltaVisitor, ResourceFlags, ResourceKind,
    ResourcePath,
};

/// Visits one store batch, keeping the element tree and cache in step with it
/// while building the corresponding model delta.
pub(crate) struct DeltaProcessor<'a> {
    manager: &'a ModelManager,
    old_project_names: HashSet<String>,
    builder: DeltaBuilder,
}

impl<'a> DeltaProcessor<'a> {
    pub(crate) fn new(manager: &'a ModelManager) -> Self {
        DeltaProcessor {
            manager,
            old_project_names: HashSet::new(),
            builder: DeltaBuilder::new(Element::model()),
        }
    }

    pub(crate) fn into_builder(self) -> DeltaBuilder {
        self.builder
    }

    fn process_root(&mut self) -> anyhow::Result<bool> {
        self.old_project_names = self.manager.project_names()?.into_iter().collect();
        Ok(true)
    }

    // ── Projects ────────────────────────────────────────────

    fn process_project(&mut self, delta: &ResourceDelta) -> anyhow::Result<bool> {
        let Some(name) = delta.path.name() else {
            return Ok(false);
        };
        let project = Element::project(name)?;
        match delta.change {
            ResourceChange::Added => {
                if self.is_model_project(name)? {
                    self.manager.add_to_model(&project);
                    self.translate_added(delta, &project)?;
                }
                Ok(false)
            }
            ResourceChange::Removed => {
                if self.was_model_project(name) {
                    self.manager.remove_from_model(&project);
                    self.translate_removed(delta, &project)?;
                }
                Ok(false)
            }
            ResourceChange::Changed => self.process_changed_project(delta, name, &project),
        }
    }

    fn process_changed_project(
        &mut self,
        delta: &ResourceDelta,
        name: &str,
        project: &Element,
    ) -> anyhow::Result<bool> {
        let info = self.manager.store().project(name)?;

        if delta.flags.contains(ResourceFlags::OPEN) {
            let open = info.as_ref().is_some_and(|info| info.open);
            if open {
                if self.is_model_project(name)? {
                    self.manager.add_to_model(project);
                    self.builder.added(project, DeltaFlags::OPEN);
                }
            } else if self.was_model_project(name) {
                self.manager.remove_from_model(project);
                self.builder.removed(project, DeltaFlags::OPEN);
            }
            return Ok(false);
        }

        let is_model_project = info.as_ref().is_some_and(|info| info.is_model_project());
        if delta.flags.contains(ResourceFlags::DESCRIPTION) {
            if self.was_model_project(name) != is_model_project {
                if is_model_project {
                    self.manager.add_to_model(project);
                    self.builder.added(project, DeltaFlags::DESCRIPTION);
                } else {
                    self.manager.remove_from_model(project);
                    self.builder.removed(project, DeltaFlags::DESCRIPTION);
                }
                // Children are covered by the addition or removal.
                return Ok(false);
            }
            if is_model_project {
                self.builder.changed(project, DeltaFlags::DESCRIPTION);
            }
        }

        if !is_model_project {
            return Ok(false);
        }
        // The project may have been removed, re-added and changed since the
        // model last saw it.
        if self.manager.is_attached(project) == Some(false) {
            self.manager.add_to_model(project);
        }
        Ok(true)
    }

    fn is_model_project(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self
            .manager
            .store()
            .project(name)?
            .is_some_and(|info| info.is_model_project()))
    }

    fn was_model_project(&self, name: &str) -> bool {
        self.old_project_names.contains(name)
    }

    // ── Files ───────────────────────────────────────────────

    fn process_file(&mut self, delta: &ResourceDelta) -> anyhow::Result<bool> {
        let Some(file) = file_for(&delta.path) else {
            return Ok(false);
        };
        match delta.change {
            ResourceChange::Added => {
                self.manager.add_to_model(&file);
                self.translate_added(delta, &file)?;
            }
            ResourceChange::Removed => {
                self.manager.remove_from_model(&file);
                self.translate_removed(delta, &file)?;
            }
            ResourceChange::Changed => {
                if !delta.flags.difference(ResourceFlags::COSMETIC).is_empty() {
                    self.content_changed(&file);
                }
            }
        }
        Ok(false)
    }

    fn content_changed(&mut self, file: &Element) {
        if self.manager.is_working_copy(file) {
            // The buffer stays authoritative; keep its body.
            self.builder
                .changed(file, DeltaFlags::CONTENT | DeltaFlags::UNDERLYING_RESOURCE);
        } else {
            self.manager.close(file);
            self.builder.changed(file, DeltaFlags::CONTENT);
        }
    }

    // ── Moves ───────────────────────────────────────────────

    fn translate_added(&mut self, delta: &ResourceDelta, element: &Element) -> anyhow::Result<()> {
        let source = match &delta.moved_from {
            Some(from) if delta.flags.contains(ResourceFlags::MOVED_FROM) => {
                self.resolve_moved_from(from, delta.kind)?
            }
            _ => None,
        };
        match source {
            Some(old) => {
                debug!("{} moved from {}", element, old);
                self.builder.moved_from(&old, element);
            }
            None => {
                self.builder.added(element, DeltaFlags::empty());
            }
        }
        Ok(())
    }

    fn translate_removed(&mut self, delta: &ResourceDelta, element: &Element) -> anyhow::Result<()> {
        let target = match &delta.moved_to {
            Some(to) if delta.flags.contains(ResourceFlags::MOVED_TO) => {
                self.resolve_moved_to(to, delta.kind)?
            }
            _ => None,
        };
        match target {
            Some(new) => {
                debug!("{} moved to {}", element, new);
                self.builder.moved_to(&new, element);
            }
            None => {
                self.builder.removed(element, DeltaFlags::empty());
            }
        }
        Ok(())
    }

    /// The element a resource was moved from, if that location held one
    /// before this batch.
    fn resolve_moved_from(
        &self,
        path: &ResourcePath,
        kind: ResourceKind,
    ) -> anyhow::Result<Option<Element>> {
        let Some(element) = element_for(path, kind) else {
            return Ok(None);
        };
        let project_name = project_name_of(path);
        Ok(project_name
            .filter(|name| self.was_model_project(name))
            .map(|_| element))
    }

    /// The element a resource was moved to, if that location holds one now.
    fn resolve_moved_to(
        &self,
        path: &ResourcePath,
        kind: ResourceKind,
    ) -> anyhow::Result<Option<Element>> {
        let Some(element) = element_for(path, kind) else {
            return Ok(None);
        };
        let Some(project_name) = project_name_of(path) else {
            return Ok(None);
        };
        Ok(self.is_model_project(project_name)?.then_some(element))
    }
}

impl ResourceDeltaVisitor for DeltaProcessor<'_> {
    fn visit(&mut self, delta: &ResourceDelta) -> anyhow::Result<bool> {
        match delta.kind {
            ResourceKind::Root => self.process_root(),
            ResourceKind::Container if delta.path.depth() == 1 => self.process_project(delta),
            // Nested folders hold no model elements themselves.
            ResourceKind::Container => Ok(true),
            ResourceKind::Leaf => self.process_file(delta),
        }
    }
}

/// Maps a resource to the element of the same shape, ignoring whether the
/// resource currently qualifies.
fn element_for(path: &ResourcePath, kind: ResourceKind) -> Option<Element> {
    match kind {
        ResourceKind::Root => Some(Element::model()),
        ResourceKind::Container if path.depth() == 1 => Element::project(path.name()?).ok(),
        ResourceKind::Container => None,
        ResourceKind::Leaf => file_for(path),
    }
}

/// The file element for a leaf directly inside a top-level container with
/// the model file extension.
fn file_for(path: &ResourcePath) -> Option<Element> {
    let [project, name] = path.segments() else {
        return None;
    };
    if !has_file_extension(name) {
        return None;
    }
    Element::project(project).ok()?.file(name).ok()
}

fn project_name_of(path: &ResourcePath) -> Option<&str> {
    path.segments().first().map(String::as_str)
}
