//! Fisc Federation: Data Federation Executor
//!
//! Runs one stage of an execution plan against its sources:
//!
//! ```text
//! call → cache? → circuit → rate budget → adapter (retry/backoff) → result
//! ```
//!
//! Individual source failures come back as [`SourceAdapterResult`] values with
//! a status, never as errors; the executor returns within the stage deadline
//! plus a small grace.
//!
//! [`SourceAdapterResult`]: fisc_core::SourceAdapterResult

pub mod cache;
pub mod executor;
pub mod fixture;
pub mod http;

pub use cache::ResponseCache;
pub use executor::{DataFederationExecutor, StageOutcome};
pub use fixture::{load_fixture_dir, FixtureBehavior, StaticSourceAdapter};
pub use http::HttpSourceAdapter;
