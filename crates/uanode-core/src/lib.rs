//! # uanode-core
//!
//! Core address-space model and value sources.
//!
//! This crate provides:
//! - Node ids, value and status types
//! - Static and computed value sources, single-writer state cells
//! - The in-memory node store
//! - Host statistics for computed sources
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod host;
pub mod model;
pub mod node;
pub mod node_id;
pub mod source;
pub mod store;

pub use model::*;
pub use node::{Node, NodeClass, NodeKind, Variable, VariableSpec};
pub use node_id::{Identifier, NodeId, NodeIdParseError, APP_NAMESPACE};
pub use source::{state_cell, SourceError, StateReader, StateWriter, ValueSource};
pub use store::{MemoryNodeStore, NodeStore, StoreError};
