//! Fisc Engine: investigation orchestration
//!
//! Wires the pipeline crates together for one query:
//!
//! ```text
//! query → fisc-in → fisc-planner → fisc-federation (stage by stage)
//!       → fisc-graph (merge per stage) → fisc-anomaly → InvestigationResult
//! ```
//!
//! The caller always gets an [`InvestigationResult`]. Its status is
//! `completed` when every planned call returned data, `degraded` when some
//! sources were missing or late, and `failed` only when every call of a
//! required stage failed (the partial graph is still returned).

pub mod investigator;
pub mod report;

pub use investigator::{EngineError, Investigator, InvestigatorBuilder};
pub use report::{
    InvestigationRequest, InvestigationResult, InvestigationStatus, SourceHealth, SourceReport,
    StageReport,
};
