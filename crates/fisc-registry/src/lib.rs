//! Fisc Registry: which sources exist, what they answer, which adapter serves them
pub mod capabilities;
pub mod source_registry;

pub use capabilities::{domains, CapabilityMatrix};
pub use source_registry::{RegistryError, SourceRegistry};
