//! AnomalyScorer: run every detector over one graph

use crate::concentration::supplier_concentration;
use crate::contracts::ContractFacts;
use crate::finding::{sort_findings, AnomalyFinding, FindingKind};
use crate::inequality::{inequality_report, spending_inequality, InequalityReport};
use crate::outliers::price_outliers;
use crate::similarity::near_duplicates;
use crate::temporal::temporal_clusters;
use fisc_core::{AnomalySettings, EngineConfig};
use fisc_graph::EntityGraph;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Ordered by severity, confidence, id
    pub findings: Vec<AnomalyFinding>,
    pub inequality: InequalityReport,
    pub contracts_scored: usize,
    /// Scored over a graph missing some sources
    pub partial: bool,
}

impl AnomalyReport {
    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &AnomalyFinding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnomalyScorer {
    settings: AnomalySettings,
}

impl AnomalyScorer {
    pub fn new(settings: AnomalySettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.anomaly.clone())
    }

    pub fn settings(&self) -> &AnomalySettings {
        &self.settings
    }

    /// Score the graph; the graph is only read
    pub fn score(&self, graph: &EntityGraph) -> AnomalyReport {
        let contracts = ContractFacts::collect(graph);
        let settings = &self.settings;

        let mut findings = price_outliers(&contracts, settings);
        findings.extend(supplier_concentration(&contracts, settings));
        findings.extend(near_duplicates(&contracts, settings));
        findings.extend(temporal_clusters(&contracts, settings));

        let inequality = inequality_report(&contracts, settings.atkinson_epsilon);
        findings.extend(spending_inequality(&contracts, &inequality, settings));
        sort_findings(&mut findings);

        info!(
            contracts = contracts.len(),
            findings = findings.len(),
            "Anomaly scoring complete"
        );
        AnomalyReport {
            findings,
            inequality,
            contracts_scored: contracts.len(),
            partial: false,
        }
    }
}
