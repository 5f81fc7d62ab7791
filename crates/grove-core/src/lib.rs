//! Grove Core: Element handles, body cache, deltas and the model manager

pub mod model;
pub mod error;
pub mod resource;
pub mod body;
pub mod cache;
pub mod delta;
pub mod structure;
pub mod reconcile;
pub mod events;
pub mod manager;
mod processor;


#[cfg(test)]
pub mod test_utils;

pub use model::{Element, ElementKind, FILE_EXTENSION, has_file_extension};
pub use error::{Existence, ModelError, Result};
pub use resource::{
    ProjectInfo, RecordedChange, ResourceChange, ResourceChangeListener, ResourceDelta,
    ResourceDeltaVisitor, ResourceFlags, ResourceKind, ResourcePath, ResourceStore, Subscribers,
    SubscriptionId,
};
pub use body::{Body, SourceAttributes, TextRange};
pub use cache::{CacheStats, DEFAULT_FILE_CAPACITY, ElementCache, ModelCache, ModelConfig};
pub use delta::{DeltaBuilder, DeltaFlags, DeltaKind, ElementDelta};
pub use structure::{ConstructKind, FileStructure, SourceConstruct, StructureBuilder, assemble};
pub use reconcile::structure_delta;
pub use events::{ChangeEventKind, ElementChangeEvent, ElementChangeListener, ListenerId};
pub use manager::ModelManager;
