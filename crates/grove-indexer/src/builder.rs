//! Structure builder for `.foo` files

use anyhow::Result;
use grove_core::{Element, SourceConstruct, StructureBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::parser::{Module, parse};

/// Parsing options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexerConfig {
    /// Fail the build on any syntax error instead of keeping the
    /// well-formed declarations.
    pub strict: bool,
}

/// Builds file structure from `.foo` sources: variables first, then
/// definitions, each in source order.
#[derive(Debug, Clone, Default)]
pub struct FooStructureBuilder {
    config: IndexerConfig,
}

impl FooStructureBuilder {
    pub fn new(config: IndexerConfig) -> Self {
        Self { config }
    }

    fn constructs(module: Module) -> Vec<SourceConstruct> {
        let vars = module
            .vars
            .into_iter()
            .map(|var| SourceConstruct::var(var.name, var.full_range, var.name_range));
        let defs = module
            .defs
            .into_iter()
            .map(|def| SourceConstruct::def(def.name, def.params, def.full_range, def.name_range));
        vars.chain(defs).collect()
    }
}

impl StructureBuilder for FooStructureBuilder {
    fn build(&self, file: &Element, source: &str) -> Result<Vec<SourceConstruct>> {
        let mut module = parse(source);
        if module.has_errors() {
            if self.config.strict {
                let first = module.errors.swap_remove(0);
                return Err(anyhow::Error::new(first).context(format!(
                    "{} has {} syntax errors",
                    file,
                    module.errors.len() + 1
                )));
            }
            for err in &module.errors {
                debug!("Syntax error in {}: {}", file, err);
            }
        }
        Ok(Self::constructs(module))
    }
}
