//! Fisc Core: data model, source adapter contract and engine configuration
//!
//! Shared vocabulary for every stage of an investigation:
//!
//! ```text
//! Query → Intent + Entities → ExecutionPlan → SourceAdapterResult* → EntityGraph → Findings
//! ```
//!
//! Circuit and rate-limit state live in `fisc-resilience`; everything here is
//! either immutable per request or plain configuration.

pub mod adapter;
pub mod config;
pub mod context;
pub mod data_model;
pub mod error;
pub mod payload;

pub use adapter::{FetchOutcome, SourceAdapter};
pub use config::{
    AnomalySettings, CacheSettings, CircuitBreakerSettings, CircuitThresholds, EngineConfig,
    InvestigationSettings, PriceMethod, RateLimitSettings, RateLimitStrategy, RateLimitTier,
    RetrySettings, SourceKind, SourceSettings,
};
pub use context::InvestigationContext;
pub use data_model::{
    param_keys, CallParams, DocumentKind, EntityKind, EntityValue, ExecutionPlan,
    ExtractedEntity, Intent, IntentKind, IntentSource, Query, QueryFilters, SkippedSource,
    SourceAdapterResult, SourceCall, SourceStatus, Span, Stage,
};
pub use error::{AdapterError, ConfigError, FiscError, SourceError};

/// Engine version reported in investigation results
pub const ENGINE_VERSION: &str = "1.0.0";
