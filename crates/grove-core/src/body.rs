//! Bodies: the materialized, cacheable content of an element

use serde::Serialize;

use crate::model::Element;

/// A span of source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TextRange {
    pub offset: usize,
    pub length: usize,
}

impl TextRange {
    pub fn new(offset: usize, length: usize) -> Self {
        TextRange { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

/// Attributes carried by source-construct bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceAttributes {
    /// The full text range of the construct.
    pub full_range: Option<TextRange>,
    /// The range of the construct's name.
    pub identifying_range: Option<TextRange>,
    /// Parameter names of a callable construct, in declaration order.
    pub parameter_names: Vec<String>,
}

impl SourceAttributes {
    /// Whether the attributes differ in anything other than their ranges.
    pub fn content_differs(&self, other: &SourceAttributes) -> bool {
        self.parameter_names != other.parameter_names
    }
}

/// Snapshot of one element's children and attributes.
///
/// Bodies are published behind an `Arc` and never mutated afterwards; a change
/// always installs a new body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Body {
    children: Vec<Element>,
    attributes: Option<SourceAttributes>,
}

impl Body {
    pub fn new(children: Vec<Element>) -> Self {
        Body {
            children,
            attributes: None,
        }
    }

    pub fn with_attributes(children: Vec<Element>, attributes: SourceAttributes) -> Self {
        Body {
            children,
            attributes: Some(attributes),
        }
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn attributes(&self) -> Option<&SourceAttributes> {
        self.attributes.as_ref()
    }

    pub fn contains(&self, element: &Element) -> bool {
        self.children.contains(element)
    }

    /// A copy of this body with `child` appended, or `None` if already present.
    pub fn with_child(&self, child: &Element) -> Option<Body> {
        if self.contains(child) {
            return None;
        }
        let mut body = self.clone();
        body.children.push(child.clone());
        Some(body)
    }

    /// A copy of this body without `child`, or `None` if it was not present.
    pub fn without_child(&self, child: &Element) -> Option<Body> {
        if !self.contains(child) {
            return None;
        }
        let mut body = self.clone();
        body.children.retain(|c| c != child);
        Some(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write_children() {
        let p1 = Element::project("P1").unwrap();
        let p2 = Element::project("P2").unwrap();
        let body = Body::new(vec![p1.clone()]);

        let grown = body.with_child(&p2).unwrap();
        assert_eq!(grown.children(), &[p1.clone(), p2.clone()]);
        assert_eq!(body.children(), &[p1.clone()]);
        assert!(grown.with_child(&p2).is_none());

        let shrunk = grown.without_child(&p1).unwrap();
        assert_eq!(shrunk.children(), &[p2]);
        assert!(shrunk.without_child(&p1).is_none());
    }

    #[test]
    fn test_content_ignores_ranges() {
        let a = SourceAttributes {
            full_range: Some(TextRange::new(0, 10)),
            identifying_range: Some(TextRange::new(4, 1)),
            parameter_names: vec!["x".into()],
        };
        let mut b = a.clone();
        b.full_range = Some(TextRange::new(20, 10));
        assert!(!a.content_differs(&b));
        b.parameter_names.push("y".into());
        assert!(a.content_differs(&b));
    }
}
