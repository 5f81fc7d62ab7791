//! Source scanning for `.foo` files

pub mod lexer;
pub mod parser;
pub mod builder;


pub use parser::{DefDecl, Module, ParseError, VarDecl, parse};
pub use builder::{FooStructureBuilder, IndexerConfig};
