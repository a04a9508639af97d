//! Fisc Planner: from intent and entities to an ordered list of stages
//!
//! Planning is pure. The same intent, entities, registry and budget always
//! produce the same plan; only [`binding`] looks at runtime data, filling
//! `depends_on` keys from earlier stage payloads.

pub mod binding;
pub mod planner;

pub use binding::{bind_stage, BoundStage, StageOutputs};
pub use planner::{entity_params, ExecutionPlanner};
