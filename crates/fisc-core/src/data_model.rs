//! Data Model: Query, Intent, ExtractedEntity, ExecutionPlan, SourceAdapterResult
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Parameters passed to a source adapter. Ordered so fingerprints are stable.
pub type CallParams = BTreeMap<String, Value>;

/// Well-known parameter keys produced by entity extraction and stage outputs
pub mod param_keys {
    pub const CNPJ: &str = "cnpj";
    pub const CPF: &str = "cpf";
    pub const UF: &str = "uf";
    pub const IBGE_CODE: &str = "ibge_code";
    pub const ORG_CODE: &str = "org_code";
    pub const AMOUNT: &str = "amount";
    pub const DATE_FROM: &str = "date_from";
    pub const DATE_TO: &str = "date_to";
}

// ============================================================================
// QUERY
// ============================================================================

/// A user query. Created per request and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Raw free text as typed by the user
    pub text: String,
    /// Session the query belongs to
    pub session_id: String,
    /// Optional structured filters supplied by the API layer
    #[serde(default)]
    pub filters: QueryFilters,
}

impl Query {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
            filters: QueryFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Structured filters that accompany a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// SIAFI org codes (e.g. "26000")
    #[serde(default)]
    pub org_codes: Vec<String>,
    /// Supplier CNPJs, any formatting
    #[serde(default)]
    pub cnpjs: Vec<String>,
    /// Region name, UF abbreviation or IBGE code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    /// Minimum contract value in BRL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.org_codes.is_empty()
            && self.cnpjs.is_empty()
            && self.region.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.min_value.is_none()
    }
}

// ============================================================================
// INTENT
// ============================================================================

/// Finite intent taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ContractAnalysis,
    SupplierInvestigation,
    SpendingAnalysis,
    RegionalComparison,
    InequalityAnalysis,
    TemporalAnalysis,
    AnomalyDetection,
    GeneralQuery,
}

impl IntentKind {
    pub const ALL: [IntentKind; 8] = [
        IntentKind::ContractAnalysis,
        IntentKind::SupplierInvestigation,
        IntentKind::SpendingAnalysis,
        IntentKind::RegionalComparison,
        IntentKind::InequalityAnalysis,
        IntentKind::TemporalAnalysis,
        IntentKind::AnomalyDetection,
        IntentKind::GeneralQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::ContractAnalysis => "contract_analysis",
            IntentKind::SupplierInvestigation => "supplier_investigation",
            IntentKind::SpendingAnalysis => "spending_analysis",
            IntentKind::RegionalComparison => "regional_comparison",
            IntentKind::InequalityAnalysis => "inequality_analysis",
            IntentKind::TemporalAnalysis => "temporal_analysis",
            IntentKind::AnomalyDetection => "anomaly_detection",
            IntentKind::GeneralQuery => "general_query",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which classifier produced an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    /// Learned / LLM-backed model
    Model,
    /// Deterministic pattern grammar
    Pattern,
    /// Nothing matched; default intent
    Default,
}

/// Classified intent with confidence in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f64,
    /// Grammar rule that matched, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    pub source: IntentSource,
}

impl Intent {
    pub fn new(kind: IntentKind, confidence: f64, source: IntentSource) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            matched_rule: None,
            source,
        }
    }

    /// The low-confidence default returned when nothing matches
    pub fn general(confidence: f64) -> Self {
        Self::new(IntentKind::GeneralQuery, confidence, IntentSource::Default)
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Org,
    Region,
    Money,
    DateRange,
    DocumentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Cnpj,
    Cpf,
}

/// Normalized entity value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityValue {
    /// Digits-only document number
    Document { kind: DocumentKind, digits: String },
    /// Amount in BRL
    Money { amount: f64 },
    /// Canonical region; `uf` is the canonical key
    Region { uf: String, ibge_code: u8, name: String },
    /// Inclusive date range
    DateRange { start: NaiveDate, end: NaiveDate },
    /// SIAFI org code
    Org {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl EntityValue {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityValue::Document { .. } => EntityKind::DocumentId,
            EntityValue::Money { .. } => EntityKind::Money,
            EntityValue::Region { .. } => EntityKind::Region,
            EntityValue::DateRange { .. } => EntityKind::DateRange,
            EntityValue::Org { .. } => EntityKind::Org,
        }
    }

    /// Parameter bindings this value contributes to source calls
    pub fn param_bindings(&self) -> Vec<(&'static str, Value)> {
        match self {
            EntityValue::Document { kind: DocumentKind::Cnpj, digits } => {
                vec![(param_keys::CNPJ, Value::String(digits.clone()))]
            }
            EntityValue::Document { kind: DocumentKind::Cpf, digits } => {
                vec![(param_keys::CPF, Value::String(digits.clone()))]
            }
            EntityValue::Money { amount } => vec![(param_keys::AMOUNT, Value::from(*amount))],
            EntityValue::Region { uf, ibge_code, .. } => vec![
                (param_keys::UF, Value::String(uf.clone())),
                (param_keys::IBGE_CODE, Value::from(*ibge_code)),
            ],
            EntityValue::DateRange { start, end } => vec![
                (param_keys::DATE_FROM, Value::String(start.to_string())),
                (param_keys::DATE_TO, Value::String(end.to_string())),
            ],
            EntityValue::Org { code, .. } => {
                vec![(param_keys::ORG_CODE, Value::String(code.clone()))]
            }
        }
    }
}

/// Byte range into the original query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An entity extracted from query text (or from structured filters, without span)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    pub value: EntityValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl ExtractedEntity {
    pub fn new(value: EntityValue, span: Option<Span>) -> Self {
        Self {
            kind: value.kind(),
            value,
            span,
        }
    }
}

// ============================================================================
// EXECUTION PLAN
// ============================================================================

/// One adapter invocation inside a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCall {
    /// Unique within a plan (`source_id` or `source_id#n` after fan-out)
    pub call_id: String,
    pub source_id: String,
    pub params: CallParams,
    /// Output keys of earlier stages this call needs bound before it runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl SourceCall {
    pub fn new(source_id: impl Into<String>, params: CallParams) -> Self {
        let source_id = source_id.into();
        Self {
            call_id: source_id.clone(),
            source_id,
            params,
            depends_on: Vec::new(),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_depends_on(mut self, keys: Vec<String>) -> Self {
        self.depends_on = keys;
        self
    }

    /// Stable fingerprint of (source, params), used as cache key
    pub fn fingerprint(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.source_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(params.as_bytes());
        format!("blake3:{}", hasher.finalize())
    }
}

/// A set of independent calls executed concurrently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub calls: Vec<SourceCall>,
    #[serde(with = "duration_ms")]
    pub deadline: Duration,
    /// When every call of a required stage fails, the investigation fails
    pub required: bool,
}

/// A source the planner left out, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub source_id: String,
    pub reason: String,
}

/// Ordered stages for one investigation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub intent: IntentKind,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub skipped: Vec<SkippedSource>,
    #[serde(with = "duration_ms")]
    pub total_budget: Duration,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(|s| s.calls.is_empty())
    }

    pub fn call_count(&self) -> usize {
        self.stages.iter().map(|s| s.calls.len()).sum()
    }

    /// Distinct source ids in plan order
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for call in self.stages.iter().flat_map(|s| s.calls.iter()) {
            if !ids.contains(&call.source_id) {
                ids.push(call.source_id.clone());
            }
        }
        ids
    }
}

// ============================================================================
// SOURCE RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Partial,
    TransientError,
    PermanentError,
    RateLimited,
    CircuitOpen,
}

impl SourceStatus {
    /// Result carries a payload that can be merged
    pub fn is_usable(&self) -> bool {
        matches!(self, SourceStatus::Success | SourceStatus::Partial)
    }

    /// Produced locally without a network attempt
    pub fn is_synthesized(&self) -> bool {
        matches!(self, SourceStatus::RateLimited | SourceStatus::CircuitOpen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "success",
            SourceStatus::Partial => "partial",
            SourceStatus::TransientError => "transient_error",
            SourceStatus::PermanentError => "permanent_error",
            SourceStatus::RateLimited => "rate_limited",
            SourceStatus::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one SourceCall. Retries overwrite; only the last attempt is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAdapterResult {
    pub source_id: String,
    pub call_id: String,
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub fetched_at: DateTime<Utc>,
    /// Network attempts made (0 when synthesized locally)
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
}

impl SourceAdapterResult {
    pub fn success(call: &SourceCall, payload: Value, latency: Duration) -> Self {
        Self::with_payload(call, SourceStatus::Success, payload, latency)
    }

    pub fn partial(call: &SourceCall, payload: Value, latency: Duration) -> Self {
        Self::with_payload(call, SourceStatus::Partial, payload, latency)
    }

    fn with_payload(
        call: &SourceCall,
        status: SourceStatus,
        payload: Value,
        latency: Duration,
    ) -> Self {
        Self {
            source_id: call.source_id.clone(),
            call_id: call.call_id.clone(),
            status,
            payload: Some(payload),
            latency,
            fetched_at: Utc::now(),
            attempts: 1,
            reason: None,
            from_cache: false,
        }
    }

    /// A failed or locally synthesized result
    pub fn failure(call: &SourceCall, status: SourceStatus, reason: impl Into<String>) -> Self {
        Self {
            source_id: call.source_id.clone(),
            call_id: call.call_id.clone(),
            status,
            payload: None,
            latency: Duration::ZERO,
            fetched_at: Utc::now(),
            attempts: 0,
            reason: Some(reason.into()),
            from_cache: false,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Content digest identifying this result for idempotent merges
    pub fn digest(&self) -> String {
        let payload = self
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.source_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.call_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.fetched_at.to_rfc3339().as_bytes());
        hasher.update(&[0]);
        hasher.update(payload.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Serialize `Duration` as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
