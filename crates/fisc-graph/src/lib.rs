//! Fisc Graph: Entity Graph Builder
//!
//! Folds source payloads into one graph of Contract, Supplier, Agency,
//! MonetaryValue and Date nodes keyed by canonical identifiers. Merging is
//! commutative and idempotent:
//!
//! - every field keeps the value with the greatest stamp
//!   `(fetched_at, source_id, result digest, value)`
//! - provenance is a set of source ids
//! - a result already merged (same digest) is skipped

pub mod builder;
pub mod canonical;
pub mod graph;
pub mod mapping;

pub use builder::{EntityGraphBuilder, MergeStats};
pub use graph::{
    fields, ContractView, Edge, EntityGraph, FieldValue, GraphSummary, Node, NodeId, NodeKind,
    Relation, Stamp,
};
pub use mapping::{map_record, ContractRecord, MappedRecord, PartyRecord};
