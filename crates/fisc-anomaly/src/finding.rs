//! AnomalyFinding and its ordering

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    PriceOutlier,
    SupplierConcentration,
    NearDuplicate,
    TemporalCluster,
    SpendingInequality,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::PriceOutlier => "price_outlier",
            FindingKind::SupplierConcentration => "supplier_concentration",
            FindingKind::NearDuplicate => "near_duplicate",
            FindingKind::TemporalCluster => "temporal_cluster",
            FindingKind::SpendingInequality => "spending_inequality",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A graph element a finding was computed from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EvidenceRef {
    Node(String),
    Edge(String),
}

impl EvidenceRef {
    pub fn node(id: impl fmt::Display) -> Self {
        EvidenceRef::Node(id.to_string())
    }

    pub fn edge(id: impl Into<String>) -> Self {
        EvidenceRef::Edge(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            EvidenceRef::Node(id) | EvidenceRef::Edge(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    /// `0x` + blake3 of kind and evidence; stable across runs
    pub id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    /// In `[0, 1]`
    pub confidence: f64,
    /// Self-contained explanation for report writers
    pub description: String,
    pub evidence: Vec<EvidenceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_value: Option<f64>,
    /// Numbers the detector decided on (z, share, similarity, ...)
    pub metrics: BTreeMap<String, f64>,
}

impl AnomalyFinding {
    /// Evidence is deduplicated and sorted before the id is derived
    pub fn new(kind: FindingKind, mut evidence: Vec<EvidenceRef>) -> Self {
        evidence.sort();
        evidence.dedup();

        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        for item in &evidence {
            hasher.update(&[0]);
            hasher.update(item.id().as_bytes());
        }

        Self {
            id: format!("0x{}", hasher.finalize().to_hex()),
            kind,
            severity: Severity::Low,
            confidence: 0.0,
            description: String::new(),
            evidence,
            affected_value: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Clamped to `[0, 1]`; NaN becomes 0
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_affected_value(mut self, value: f64) -> Self {
        self.affected_value = value.is_finite().then_some(value);
        self
    }

    /// Non-finite metrics are dropped
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        if value.is_finite() {
            self.metrics.insert(name.to_string(), value);
        }
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn references(&self, id: &str) -> bool {
        self.evidence.iter().any(|e| e.id() == id)
    }
}

/// Severity desc, confidence desc, id asc
pub fn sort_findings(findings: &mut [AnomalyFinding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Step from a ratio past a threshold to a severity
pub(crate) fn graded(excess: f64, steps: [(f64, Severity); 3]) -> Severity {
    steps
        .iter()
        .find(|(at, _)| excess >= *at)
        .map(|(_, severity)| *severity)
        .unwrap_or(Severity::Low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ignores_evidence_order() {
        let a = AnomalyFinding::new(
            FindingKind::NearDuplicate,
            vec![EvidenceRef::node("contract:A"), EvidenceRef::node("contract:B")],
        );
        let b = AnomalyFinding::new(
            FindingKind::NearDuplicate,
            vec![EvidenceRef::node("contract:B"), EvidenceRef::node("contract:A")],
        );
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("0x"));

        let c = AnomalyFinding::new(FindingKind::PriceOutlier, a.evidence.clone());
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let f = AnomalyFinding::new(FindingKind::PriceOutlier, vec![]);
        assert_eq!(f.clone().with_confidence(1.7).confidence, 1.0);
        assert_eq!(f.clone().with_confidence(-0.2).confidence, 0.0);
        assert_eq!(f.with_confidence(f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_sort_order() {
        let make = |node: &str, severity, confidence| {
            AnomalyFinding::new(FindingKind::PriceOutlier, vec![EvidenceRef::node(node)])
                .with_severity(severity)
                .with_confidence(confidence)
        };
        let mut findings = vec![
            make("a", Severity::Low, 0.9),
            make("b", Severity::High, 0.5),
            make("c", Severity::High, 0.8),
        ];
        sort_findings(&mut findings);
        let order: Vec<_> = findings.iter().map(|f| f.evidence[0].id()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_evidence_serializes_tagged() {
        let json = serde_json::to_value(EvidenceRef::edge("a|awarded_to|b")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "edge", "id": "a|awarded_to|b" }));
    }

    #[test]
    fn test_graded_severity() {
        let steps = [(2.0, Severity::Critical), (1.0, Severity::High), (0.5, Severity::Medium)];
        assert_eq!(graded(2.5, steps), Severity::Critical);
        assert_eq!(graded(1.0, steps), Severity::High);
        assert_eq!(graded(0.7, steps), Severity::Medium);
        assert_eq!(graded(0.1, steps), Severity::Low);
    }
}
