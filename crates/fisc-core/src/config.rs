//! Engine configuration
//!
//! Loaded once at startup from YAML and validated eagerly: a bad threshold or a
//! dangling tier reference fails the load instead of the first investigation.
//!
//! ```yaml
//! investigation:
//!   total_budget_ms: 60000
//!   worker_pool_size: 8
//! rate_limits:
//!   default_tier: standard
//!   tiers:
//!     standard: { strategy: token_bucket, limit: 60, window_ms: 60000, burst: 10 }
//! sources:
//!   - id: portal_transparencia.contratos
//!     base_url: https://api.portaldatransparencia.gov.br
//!     endpoint: /api-de-dados/contratos
//!     capabilities: [contracts]
//!     provides: [cnpj]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub investigation: InvestigationSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub anomaly: AnomalySettings,
    /// Adapter registry entries
    pub sources: Vec<SourceSettings>,
}

impl EngineConfig {
    /// Defaults for every section around the given sources
    pub fn with_sources(sources: Vec<SourceSettings>) -> Self {
        Self {
            investigation: InvestigationSettings::default(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            rate_limits: RateLimitSettings::default(),
            cache: CacheSettings::default(),
            anomaly: AnomalySettings::default(),
            sources,
        }
    }

    /// Read, parse and validate a YAML configuration file
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML content
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.investigation.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limits.validate()?;
        self.cache.validate()?;
        self.anomaly.validate()?;

        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "at least one source is required"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
            if let Some(tier) = &source.rate_limit_tier {
                if !self.rate_limits.tiers.contains_key(tier) {
                    return Err(ConfigError::UnknownTier {
                        source_id: source.id.clone(),
                        tier: tier.clone(),
                    });
                }
            }
        }

        for id in self.circuit_breaker.overrides.keys() {
            if !seen.contains(id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("circuit_breaker.overrides.{}", id),
                    "no such source",
                ));
            }
        }

        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Rate-limit tier in force for a source
    pub fn tier_for(&self, source_id: &str) -> Option<&RateLimitTier> {
        let name = self
            .source(source_id)
            .and_then(|s| s.rate_limit_tier.as_deref())
            .unwrap_or(&self.rate_limits.default_tier);
        self.rate_limits.tiers.get(name)
    }
}

// ============================================================================
// INVESTIGATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestigationSettings {
    /// Overall budget for one investigation
    pub total_budget_ms: u64,
    /// Fixed per-stage deadline; when unset, stages split the remaining budget
    pub stage_deadline_ms: Option<u64>,
    pub max_stages: usize,
    /// Concurrent adapter calls per stage execution
    pub worker_pool_size: usize,
    /// Slack the executor allows past a stage deadline before returning
    pub deadline_grace_ms: u64,
    /// Maximum calls a dependent source is expanded into
    pub max_fanout: usize,
}

impl Default for InvestigationSettings {
    fn default() -> Self {
        Self {
            total_budget_ms: 60_000,
            stage_deadline_ms: None,
            max_stages: 4,
            worker_pool_size: 8,
            deadline_grace_ms: 250,
            max_fanout: 5,
        }
    }
}

impl InvestigationSettings {
    pub fn total_budget(&self) -> Duration {
        Duration::from_millis(self.total_budget_ms)
    }

    pub fn stage_deadline(&self) -> Option<Duration> {
        self.stage_deadline_ms.map(Duration::from_millis)
    }

    pub fn deadline_grace(&self) -> Duration {
        Duration::from_millis(self.deadline_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.total_budget_ms == 0 {
            return Err(ConfigError::invalid("investigation.total_budget_ms", "must be > 0"));
        }
        if self.stage_deadline_ms == Some(0) {
            return Err(ConfigError::invalid("investigation.stage_deadline_ms", "must be > 0"));
        }
        if self.max_stages == 0 {
            return Err(ConfigError::invalid("investigation.max_stages", "must be > 0"));
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::invalid("investigation.worker_pool_size", "must be > 0"));
        }
        if self.max_fanout == 0 {
            return Err(ConfigError::invalid("investigation.max_fanout", "must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Capped exponential backoff: `min(base * multiplier^n, max)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.multiplier >= 1.0) {
            return Err(ConfigError::invalid("retry.multiplier", "must be >= 1.0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid("retry.max_delay_ms", "must be >= base_delay_ms"));
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Resolved thresholds for one source's breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitThresholds {
    /// N consecutive failures open the circuit
    pub failure_threshold: u32,
    /// M consecutive half-open successes close it
    pub success_threshold: u32,
    pub cooldown: Duration,
    /// Probe calls allowed concurrently while half-open
    pub half_open_max_trials: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitOverride {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_ms: u64,
    pub half_open_max_trials: u32,
    /// Per-source overrides keyed by source id
    pub overrides: BTreeMap<String, CircuitOverride>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown_ms: 60_000,
            half_open_max_trials: 1,
            overrides: BTreeMap::new(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn thresholds_for(&self, source_id: &str) -> CircuitThresholds {
        let o = self.overrides.get(source_id).cloned().unwrap_or_default();
        CircuitThresholds {
            failure_threshold: o.failure_threshold.unwrap_or(self.failure_threshold),
            success_threshold: o.success_threshold.unwrap_or(self.success_threshold),
            cooldown: Duration::from_millis(o.cooldown_ms.unwrap_or(self.cooldown_ms)),
            half_open_max_trials: self.half_open_max_trials,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker.failure_threshold", "must be > 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker.success_threshold", "must be > 0"));
        }
        if self.half_open_max_trials == 0 {
            return Err(ConfigError::invalid("circuit_breaker.half_open_max_trials", "must be > 0"));
        }
        for (id, o) in &self.overrides {
            if o.failure_threshold == Some(0) || o.success_threshold == Some(0) {
                return Err(ConfigError::invalid(
                    format!("circuit_breaker.overrides.{}", id),
                    "thresholds must be > 0",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// RATE LIMITS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

/// A named rate-limit tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub strategy: RateLimitStrategy,
    /// Sustained calls allowed per window
    pub limit: u32,
    pub window_ms: u64,
    /// Bucket capacity for token/leaky buckets (defaults to `limit`)
    #[serde(default)]
    pub burst: Option<u32>,
}

impl RateLimitTier {
    pub fn new(strategy: RateLimitStrategy, limit: u32, window: Duration) -> Self {
        Self {
            strategy,
            limit,
            window_ms: window.as_millis() as u64,
            burst: None,
        }
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn capacity(&self) -> u32 {
        self.burst.unwrap_or(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub default_tier: String,
    pub tiers: BTreeMap<String, RateLimitTier>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let minute = Duration::from_secs(60);
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "standard".to_string(),
            RateLimitTier::new(RateLimitStrategy::TokenBucket, 60, minute).with_burst(10),
        );
        tiers.insert(
            "strict".to_string(),
            RateLimitTier::new(RateLimitStrategy::SlidingWindow, 10, minute),
        );
        tiers.insert(
            "relaxed".to_string(),
            RateLimitTier::new(RateLimitStrategy::FixedWindow, 300, minute),
        );
        Self {
            default_tier: "standard".to_string(),
            tiers,
        }
    }
}

impl RateLimitSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.tiers.contains_key(&self.default_tier) {
            return Err(ConfigError::invalid(
                "rate_limits.default_tier",
                format!("tier `{}` is not defined", self.default_tier),
            ));
        }
        for (name, tier) in &self.tiers {
            if tier.limit == 0 || tier.window_ms == 0 || tier.burst == Some(0) {
                return Err(ConfigError::invalid(
                    format!("rate_limits.tiers.{}", name),
                    "limit, window_ms and burst must be > 0",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_entries: 1_024,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && (self.ttl_ms == 0 || self.max_entries == 0) {
            return Err(ConfigError::invalid("cache", "ttl_ms and max_entries must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// ANOMALY THRESHOLDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceMethod {
    ZScore,
    Iqr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    pub price_method: PriceMethod,
    /// Standard deviations from the peer mean
    pub z_threshold: f64,
    /// Tukey fence multiplier
    pub iqr_multiplier: f64,
    /// Minimum peers (excluding the contract) for a price comparison
    pub min_peer_group: usize,
    /// Supplier share of an agency's value that raises a finding
    pub concentration_ratio: f64,
    pub min_agency_contracts: usize,
    /// Description similarity that marks two contracts as near-duplicates
    pub similarity_threshold: f64,
    pub max_pairwise_contracts: usize,
    pub temporal_window_days: u32,
    /// Window count / expected count that marks a cluster
    pub temporal_ratio: f64,
    pub min_cluster_size: usize,
    pub inequality_gini_threshold: f64,
    pub atkinson_epsilon: f64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            price_method: PriceMethod::ZScore,
            z_threshold: 2.5,
            iqr_multiplier: 1.5,
            min_peer_group: 4,
            concentration_ratio: 0.7,
            min_agency_contracts: 3,
            similarity_threshold: 0.85,
            max_pairwise_contracts: 2_000,
            temporal_window_days: 7,
            temporal_ratio: 3.0,
            min_cluster_size: 4,
            inequality_gini_threshold: 0.6,
            atkinson_epsilon: 0.5,
        }
    }
}

impl AnomalySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let ratio_ok = |v: f64| v > 0.0 && v <= 1.0;
        if !(self.z_threshold > 0.0) {
            return Err(ConfigError::invalid("anomaly.z_threshold", "must be > 0"));
        }
        if !(self.iqr_multiplier > 0.0) {
            return Err(ConfigError::invalid("anomaly.iqr_multiplier", "must be > 0"));
        }
        if !ratio_ok(self.concentration_ratio) {
            return Err(ConfigError::invalid("anomaly.concentration_ratio", "must be in (0, 1]"));
        }
        if !ratio_ok(self.similarity_threshold) {
            return Err(ConfigError::invalid("anomaly.similarity_threshold", "must be in (0, 1]"));
        }
        if !ratio_ok(self.inequality_gini_threshold) {
            return Err(ConfigError::invalid(
                "anomaly.inequality_gini_threshold",
                "must be in (0, 1]",
            ));
        }
        if self.temporal_window_days == 0 {
            return Err(ConfigError::invalid("anomaly.temporal_window_days", "must be > 0"));
        }
        if !(self.temporal_ratio > 1.0) {
            return Err(ConfigError::invalid("anomaly.temporal_ratio", "must be > 1"));
        }
        if !(self.atkinson_epsilon > 0.0) {
            return Err(ConfigError::invalid("anomaly.atkinson_epsilon", "must be > 0"));
        }
        if self.min_peer_group < 2 || self.min_cluster_size < 2 {
            return Err(ConfigError::invalid(
                "anomaly",
                "min_peer_group and min_cluster_size must be >= 2",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SOURCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// JSON over HTTP
    #[default]
    Http,
    /// Payloads served from local fixture files
    Static,
}

/// Registry entry for one external source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Path template; `{key}` placeholders are filled from call params
    #[serde(default)]
    pub endpoint: String,
    /// Query parameters sent on every call; values may hold `{key}`
    /// placeholders, dropped when the param is unbound
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Data domains this source can answer (ex: "contracts", "suppliers")
    pub capabilities: Vec<String>,
    /// Param keys that must be bound before the source can be called
    #[serde(default)]
    pub requires: Vec<String>,
    /// Record fields this source exposes to later stages
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub rate_limit_tier: Option<String>,
    /// Higher runs first within a stage listing
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Failure of every call in this source's stage fails the investigation
    #[serde(default)]
    pub required: bool,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_priority() -> u8 {
    50
}

impl SourceSettings {
    pub fn new(id: impl Into<String>, capabilities: &[&str]) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: SourceKind::Static,
            base_url: None,
            endpoint: String::new(),
            query: BTreeMap::new(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            requires: Vec::new(),
            provides: Vec::new(),
            timeout_ms: default_timeout_ms(),
            rate_limit_tier: None,
            priority: default_priority(),
            required: false,
        }
    }

    pub fn http(mut self, base_url: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.kind = SourceKind::Http;
        self.base_url = Some(base_url.into());
        self.endpoint = endpoint.into();
        self
    }

    pub fn requires(mut self, keys: &[&str]) -> Self {
        self.requires = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn provides(mut self, keys: &[&str]) -> Self {
        self.provides = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.rate_limit_tier = Some(tier.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::invalid("sources[].id", "must not be empty"));
        }
        let field = |f: &str| format!("sources.{}.{}", self.id, f);
        if self.capabilities.is_empty() {
            return Err(ConfigError::invalid(field("capabilities"), "must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid(field("timeout_ms"), "must be > 0"));
        }
        if self.kind == SourceKind::Http
            && self.base_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::invalid(field("base_url"), "required for http sources"));
        }
        Ok(())
    }
}
