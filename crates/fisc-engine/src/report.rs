//! Investigation request and result, as handed to the API layer

use chrono::{DateTime, Utc};
use fisc_anomaly::{AnomalyFinding, InequalityReport};
use fisc_core::data_model::duration_ms;
use fisc_core::{
    ExtractedEntity, Intent, Query, QueryFilters, SkippedSource, SourceAdapterResult, SourceStatus,
};
use fisc_graph::{EntityGraph, GraphSummary};
use fisc_resilience::CircuitSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationRequest {
    pub query: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub filters: QueryFilters,
}

fn default_session() -> String {
    "anonymous".to_string()
}

impl InvestigationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: default_session(),
            filters: QueryFilters::default(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn to_query(&self) -> Query {
        Query::new(&self.query, &self.session_id).with_filters(self.filters.clone())
    }
}

// ============================================================================
// RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    /// Every planned call returned usable data
    Completed,
    /// Some sources were missing, slow or unavailable
    Degraded,
    /// Every call of a required stage failed, or nothing could be planned
    Failed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationStatus::Completed => "completed",
            InvestigationStatus::Degraded => "degraded",
            InvestigationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub stage: usize,
    pub source_id: String,
    pub call_id: String,
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub attempts: u32,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

impl SourceReport {
    pub fn from_result(stage: usize, result: &SourceAdapterResult) -> Self {
        Self {
            stage,
            source_id: result.source_id.clone(),
            call_id: result.call_id.clone(),
            status: result.status,
            reason: result.reason.clone(),
            latency: result.latency,
            attempts: result.attempts,
            from_cache: result.from_cache,
            fetched_at: result.fetched_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub index: usize,
    pub required: bool,
    pub calls: usize,
    pub usable: usize,
    /// Calls dropped because an earlier stage produced no value to bind
    pub unresolved: usize,
    #[serde(with = "duration_ms")]
    pub deadline: Duration,
    pub deadline_exceeded: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    /// Records merged into the graph from this stage
    pub records_merged: usize,
}

/// Everything the API, persistence and report collaborators need.
///
/// Always produced: source failures show up in `sources_consulted`, never as
/// an error.
#[derive(Debug, Clone, Serialize)]
pub struct InvestigationResult {
    pub investigation_id: String,
    pub session_id: String,
    pub query: String,
    pub status: InvestigationStatus,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub intent: Intent,
    pub entities: Vec<ExtractedEntity>,
    pub graph: GraphSummary,
    pub findings: Vec<AnomalyFinding>,
    pub inequality: InequalityReport,
    pub contracts_scored: usize,
    pub sources_consulted: Vec<SourceReport>,
    pub skipped_sources: Vec<SkippedSource>,
    pub stages: Vec<StageReport>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub engine_version: String,
    /// Full graph for persistence; not part of the response body
    #[serde(skip)]
    pub entity_graph: EntityGraph,
}

impl InvestigationResult {
    /// Reports for one source, across stages and fan-out
    pub fn source(&self, source_id: &str) -> Vec<&SourceReport> {
        self.sources_consulted
            .iter()
            .filter(|s| s.source_id == source_id)
            .collect()
    }

    /// Sources that returned no usable data
    pub fn missing_sources(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = self
            .sources_consulted
            .iter()
            .filter(|s| !s.status.is_usable())
            .map(|s| s.source_id.as_str())
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

// ============================================================================
// SOURCE HEALTH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub has_adapter: bool,
    pub circuit: CircuitSnapshot,
    /// Calls admissible now; `None` when the source has no rate limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_remaining: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisc_core::{CallParams, SourceCall};

    #[test]
    fn test_request_defaults() {
        let request: InvestigationRequest =
            serde_json::from_value(serde_json::json!({ "query": "contratos em MG" })).unwrap();
        assert_eq!(request.session_id, "anonymous");
        assert!(request.filters.is_empty());

        let query = request.with_session("s-9").to_query();
        assert_eq!(query.session_id, "s-9");
        assert_eq!(query.text, "contratos em MG");
    }

    #[test]
    fn test_source_report_from_result() {
        let call = SourceCall::new("tce_mg", CallParams::new());
        let result = SourceAdapterResult::failure(&call, SourceStatus::CircuitOpen, "circuit open");
        let report = SourceReport::from_result(1, &result);
        assert_eq!(report.stage, 1);
        assert_eq!(report.attempts, 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "circuit_open");
        assert_eq!(json["latency"], 0);
        assert_eq!(InvestigationStatus::Degraded.to_string(), "degraded");
    }
}
