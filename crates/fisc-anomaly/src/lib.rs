//! Fisc Anomaly: statistical findings over the entity graph
//!
//! Detectors run over the Contract node set after the graph is assembled:
//!
//! | Detector        | Finding kind             | Signal                                   |
//! |-----------------|--------------------------|------------------------------------------|
//! | `outliers`      | `price_outlier`          | value far from its peer group (z / IQR)  |
//! | `concentration` | `supplier_concentration` | one supplier dominating an agency (+HHI) |
//! | `similarity`    | `near_duplicate`         | near-identical contract descriptions     |
//! | `temporal`      | `temporal_cluster`       | signing dates bunched in a short window  |
//! | `inequality`    | `spending_inequality`    | Gini over supplier totals                |
//!
//! Findings are immutable once built, carry the node and edge ids used as
//! evidence, and sort by severity, confidence, id.

pub mod concentration;
pub mod contracts;
pub mod finding;
pub mod inequality;
pub mod outliers;
pub mod scorer;
pub mod similarity;
pub mod temporal;

pub use finding::{sort_findings, AnomalyFinding, EvidenceRef, FindingKind, Severity};
pub use inequality::{atkinson, gini, theil, IndexValue, InequalityIndices, InequalityReport};
pub use scorer::{AnomalyReport, AnomalyScorer};
