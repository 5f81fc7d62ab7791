//! Structure builder interface and the assembly of file bodies from its output

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::body::{Body, SourceAttributes, TextRange};
use crate::error::Result;
use crate::model::Element;

/// Kind of a declaration found in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConstructKind {
    Var,
    Def,
}

/// One declaration reported by a [`StructureBuilder`], in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceConstruct {
    pub kind: ConstructKind,
    pub name: String,
    /// Parameter names; empty for variables. A def's arity is their count.
    pub parameter_names: Vec<String>,
    pub full_range: TextRange,
    pub identifying_range: TextRange,
}

impl SourceConstruct {
    pub fn var(name: impl Into<String>, full_range: TextRange, identifying_range: TextRange) -> Self {
        SourceConstruct {
            kind: ConstructKind::Var,
            name: name.into(),
            parameter_names: Vec::new(),
            full_range,
            identifying_range,
        }
    }

    pub fn def(
        name: impl Into<String>,
        parameter_names: Vec<String>,
        full_range: TextRange,
        identifying_range: TextRange,
    ) -> Self {
        SourceConstruct {
            kind: ConstructKind::Def,
            name: name.into(),
            parameter_names,
            full_range,
            identifying_range,
        }
    }
}

/// Turns the text of a file into its declarations.
pub trait StructureBuilder: Send + Sync {
    fn build(&self, file: &Element, source: &str) -> anyhow::Result<Vec<SourceConstruct>>;
}

/// A file body together with the bodies of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStructure {
    pub body: Arc<Body>,
    pub children: HashMap<Element, Arc<Body>>,
}

impl FileStructure {
    pub fn empty() -> Self {
        FileStructure {
            body: Arc::new(Body::default()),
            children: HashMap::new(),
        }
    }

    pub fn attributes_of(&self, element: &Element) -> Option<&SourceAttributes> {
        self.children.get(element).and_then(|body| body.attributes())
    }
}

/// Creates handles for `constructs` under `file`, numbering duplicates by
/// occurrence, and assembles the resulting bodies.
pub fn assemble(file: &Element, source: &str, constructs: Vec<SourceConstruct>) -> Result<FileStructure> {
    let mut occurrences: HashMap<Element, u32> = HashMap::new();
    let mut order = Vec::with_capacity(constructs.len());
    let mut children = HashMap::with_capacity(constructs.len());

    for construct in constructs {
        let base = match construct.kind {
            ConstructKind::Var => file.var(&construct.name)?,
            ConstructKind::Def => file.def(&construct.name, construct.parameter_names.len() as u32)?,
        };
        let count = occurrences.entry(base.clone()).or_insert(0);
        *count += 1;
        let element = if *count > 1 { base.with_occurrence(*count) } else { base };

        let attributes = SourceAttributes {
            full_range: Some(construct.full_range),
            identifying_range: Some(construct.identifying_range),
            parameter_names: construct.parameter_names,
        };
        children.insert(element.clone(), Arc::new(Body::with_attributes(Vec::new(), attributes)));
        order.push(element);
    }

    let file_attributes = SourceAttributes {
        full_range: Some(TextRange::new(0, source.len())),
        ..SourceAttributes::default()
    };
    Ok(FileStructure {
        body: Arc::new(Body::with_attributes(order, file_attributes)),
        children,
    })
}
