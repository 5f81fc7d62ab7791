//! Element handles: cheap, value-identity descriptors of model nodes

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::{ModelError, Result};
use crate::resource::ResourcePath;

/// File extension that makes a leaf resource a model file.
pub const FILE_EXTENSION: &str = "foo";

/// Discriminates what kind of model node an element denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementKind {
    // ── Structural (backed by resources) ────────────────────
    Model,
    Project,
    File,

    // ── Source constructs (derived by the structure builder) ─
    Var,
    Def,
}

impl ElementKind {
    /// Whether elements of this kind have an underlying external resource.
    pub fn has_resource(self) -> bool {
        matches!(self, ElementKind::Model | ElementKind::Project | ElementKind::File)
    }

    /// Whether elements of this kind are source constructs inside a file.
    pub fn is_source_construct(self) -> bool {
        matches!(self, ElementKind::Var | ElementKind::Def)
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct ElementData {
    kind: ElementKind,
    name: String,
    arity: Option<u32>,
    occurrence: u32,
    parent: Option<Element>,
}

/// Handle to a model element.
///
/// Two handles are equal iff they have the same kind, name, arity, occurrence
/// count and an equal parent chain. Handles own no state beyond their identity;
/// the materialized content lives in a [`Body`](crate::body::Body) held by the
/// model cache.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Element(Arc<ElementData>);

impl Element {
    fn new(
        kind: ElementKind,
        name: String,
        arity: Option<u32>,
        parent: Option<Element>,
    ) -> Self {
        Element(Arc::new(ElementData {
            kind,
            name,
            arity,
            occurrence: 1,
            parent,
        }))
    }

    /// The root element. Always exists.
    pub fn model() -> Self {
        Element::new(ElementKind::Model, String::new(), None, None)
    }

    /// Handle for the project with the given name under the model root.
    pub fn project(name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Element::new(
            ElementKind::Project,
            name.to_string(),
            None,
            Some(Element::model()),
        ))
    }

    /// Handle for a file inside this project.
    ///
    /// Fails if `self` is not a project or `name` lacks the `.foo` suffix.
    pub fn file(&self, name: &str) -> Result<Self> {
        if self.kind() != ElementKind::Project {
            return Err(ModelError::invalid(format!(
                "file '{name}' must be created under a project, not {self}"
            )));
        }
        validate_name(name)?;
        if !has_file_extension(name) {
            return Err(ModelError::invalid(format!(
                "'{name}' does not have the .{FILE_EXTENSION} extension"
            )));
        }
        Ok(Element::new(
            ElementKind::File,
            name.to_string(),
            None,
            Some(self.clone()),
        ))
    }

    /// Handle for a variable declared in this file.
    pub fn var(&self, name: &str) -> Result<Self> {
        self.source_construct(ElementKind::Var, name, None)
    }

    /// Handle for a definition with the given arity declared in this file.
    pub fn def(&self, name: &str, arity: u32) -> Result<Self> {
        self.source_construct(ElementKind::Def, name, Some(arity))
    }

    fn source_construct(&self, kind: ElementKind, name: &str, arity: Option<u32>) -> Result<Self> {
        if self.kind() != ElementKind::File {
            return Err(ModelError::invalid(format!(
                "{kind:?} '{name}' must be created under a file, not {self}"
            )));
        }
        validate_name(name)?;
        Ok(Element::new(kind, name.to_string(), arity, Some(self.clone())))
    }

    /// Returns a copy of this handle with the given occurrence count.
    ///
    /// Occurrence counts start at 1 and disambiguate same-named siblings.
    pub fn with_occurrence(&self, occurrence: u32) -> Self {
        debug_assert!(occurrence >= 1);
        Element(Arc::new(ElementData {
            kind: self.0.kind,
            name: self.0.name.clone(),
            arity: self.0.arity,
            occurrence,
            parent: self.0.parent.clone(),
        }))
    }

    pub fn kind(&self) -> ElementKind {
        self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn arity(&self) -> Option<u32> {
        self.0.arity
    }

    pub fn occurrence(&self) -> u32 {
        self.0.occurrence
    }

    pub fn parent(&self) -> Option<&Element> {
        self.0.parent.as_ref()
    }

    /// Walks up the parent chain to the model root.
    pub fn root(&self) -> &Element {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Ancestors from the direct parent up to the model root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Element> {
        std::iter::successors(self.parent(), |e| e.parent())
    }

    /// Whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Element) -> bool {
        other.ancestors().any(|a| a == self)
    }

    /// Number of parent links between this element and the model root.
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// The nearest enclosing file, or `self` when it is a file.
    pub fn file_ancestor(&self) -> Option<&Element> {
        std::iter::once(self)
            .chain(self.ancestors())
            .find(|e| e.kind() == ElementKind::File)
    }

    /// The path of the external resource underlying this element, if any.
    pub fn resource_path(&self) -> Option<ResourcePath> {
        match self.kind() {
            ElementKind::Model => Some(ResourcePath::root()),
            ElementKind::Project => Some(ResourcePath::root().join(self.name())),
            ElementKind::File => self
                .parent()
                .and_then(|p| p.resource_path())
                .map(|p| p.join(self.name())),
            ElementKind::Var | ElementKind::Def => None,
        }
    }

    fn write_segment(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        if let Some(arity) = self.arity() {
            write!(f, "/{arity}")?;
        }
        if self.occurrence() > 1 {
            write!(f, "#{}", self.occurrence())?;
        }
        Ok(())
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent() {
            None => f.write_str("<model>"),
            Some(parent) if parent.kind() == ElementKind::Model => self.write_segment(f),
            Some(parent) => {
                write!(f, "{parent}::")?;
                self.write_segment(f)
            }
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self)
    }
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether a leaf name carries the model file extension.
pub fn has_file_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext == FILE_EXTENSION)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ModelError::invalid("element name must not be empty"));
    }
    if name.contains('/') {
        return Err(ModelError::invalid(format!(
            "element name '{name}' must not contain '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_identity() {
        let a = Element::project("P1").unwrap().file("a.foo").unwrap();
        let b = Element::project("P1").unwrap().file("a.foo").unwrap();
        assert_eq!(a, b);

        let other_project = Element::project("P2").unwrap().file("a.foo").unwrap();
        assert_ne!(a, other_project);

        let def1 = a.def("f", 1).unwrap();
        let def2 = a.def("f", 2).unwrap();
        assert_ne!(def1, def2);
        assert_ne!(def1, def1.with_occurrence(2));
    }

    #[test]
    fn test_construction_errors() {
        let project = Element::project("P1").unwrap();
        assert!(matches!(
            project.file("readme.txt"),
            Err(ModelError::InvalidElement { .. })
        ));
        assert!(project.file(".foo").is_err());
        assert!(Element::project("").is_err());
        assert!(Element::project("a/b").is_err());
        assert!(project.var("x").is_err());
        assert!(Element::model().file("a.foo").is_err());
    }

    #[test]
    fn test_display_and_resource_path() {
        let file = Element::project("P1").unwrap().file("a.foo").unwrap();
        let def = file.def("f", 2).unwrap().with_occurrence(2);
        assert_eq!(def.to_string(), "P1::a.foo::f/2#2");
        assert_eq!(file.resource_path().unwrap().to_string(), "/P1/a.foo");
        assert_eq!(def.resource_path(), None);
        assert_eq!(def.file_ancestor(), Some(&file));
        assert!(Element::model().is_ancestor_of(&def));
        assert_eq!(def.depth(), 3);
    }
}
