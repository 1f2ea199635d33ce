//! Domain and wire types shared across the s3db engine.

pub mod behavior;
pub mod catalog;
pub mod document;
pub mod event;
pub mod partition;
pub mod value;

pub use behavior::BehaviorKind;
pub use catalog::{Catalog, ResourceCatalogEntry, SchemaVersionRecord};
pub use document::{Document, DocumentState};
pub use event::Event;
pub use partition::{PartitionDef, PartitionRef};
pub use value::Value;
