//! Collaborator models consumed by the tracker
//!
//! The diagram and the name catalog are produced elsewhere (by the editor and
//! the code generator); the tracer only reads them.

pub mod catalog;
pub mod diagram;

pub use catalog::{CatalogEntry, CatalogFile, EventCatalog, NameCatalog};
pub use diagram::{DiagramGraph, State, Transition};
