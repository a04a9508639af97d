//! Temporal clustering of signing dates
//!
//! Per agency, the baseline rate is dated contracts per day across the whole
//! observed span. A window of `temporal_window_days` holding at least
//! `min_cluster_size` contracts and `temporal_ratio` times the expected count
//! is a cluster. Windows are scanned left to right and do not overlap.

use crate::contracts::ContractFacts;
use crate::finding::{AnomalyFinding, EvidenceRef, FindingKind, Severity};
use chrono::{Duration, NaiveDate};
use fisc_core::AnomalySettings;
use std::collections::BTreeMap;

pub fn temporal_clusters(
    contracts: &[ContractFacts],
    settings: &AnomalySettings,
) -> Vec<AnomalyFinding> {
    let mut by_agency: BTreeMap<Option<&str>, Vec<(NaiveDate, &ContractFacts)>> = BTreeMap::new();
    for contract in contracts {
        if let Some(date) = contract.date {
            by_agency
                .entry(contract.agency.as_ref().map(|a| a.as_str()))
                .or_default()
                .push((date, contract));
        }
    }

    let window_days = i64::from(settings.temporal_window_days.max(1));
    let mut findings = Vec::new();
    for dated in by_agency.values_mut() {
        if dated.len() < settings.min_cluster_size {
            continue;
        }
        dated.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        let (first, last) = (dated[0].0, dated[dated.len() - 1].0);
        let span_days = (last - first).num_days() + 1;
        if span_days <= window_days {
            continue;
        }
        let expected = dated.len() as f64 / span_days as f64 * window_days as f64;

        let mut start = 0;
        while start < dated.len() {
            let window_end = dated[start].0 + Duration::days(window_days);
            let end = start + dated[start..].iter().take_while(|(d, _)| *d < window_end).count();
            let count = end - start;
            let ratio = count as f64 / expected;
            if count >= settings.min_cluster_size && ratio >= settings.temporal_ratio {
                let cluster = Cluster {
                    members: &dated[start..end],
                    expected,
                    ratio,
                    window_days,
                    baseline_contracts: dated.len(),
                    baseline_days: span_days,
                };
                findings.push(cluster.finding(settings));
                start = end;
            } else {
                start += 1;
            }
        }
    }
    findings
}

struct Cluster<'a, 'c> {
    members: &'a [(NaiveDate, &'c ContractFacts)],
    expected: f64,
    ratio: f64,
    window_days: i64,
    baseline_contracts: usize,
    baseline_days: i64,
}

impl Cluster<'_, '_> {
    fn finding(&self, settings: &AnomalySettings) -> AnomalyFinding {
        let count = self.members.len();
        let first = self.members[0];
        let last = self.members[count - 1];

        let mut evidence = Vec::new();
        evidence.extend(first.1.agency.as_ref().map(EvidenceRef::node));
        for (_, contract) in self.members {
            evidence.push(EvidenceRef::node(&contract.id));
            evidence.extend(contract.date_node().map(EvidenceRef::node));
        }
        let total: f64 = self.members.iter().filter_map(|(_, c)| c.value).sum();

        let severity = if self.ratio >= 2.0 * settings.temporal_ratio {
            Severity::High
        } else {
            Severity::Medium
        };
        let n = self.baseline_contracts as f64;
        let confidence = (1.0 - self.expected / count as f64) * (n / (n + 4.0));
        let agency = first.1.agency_label.as_deref().unwrap_or("unattributed agencies");

        let mut finding = AnomalyFinding::new(FindingKind::TemporalCluster, evidence)
            .with_severity(severity)
            .with_confidence(confidence)
            .with_description(format!(
                "{} contracts signed by {} between {} and {}, {:.1}x the expected {:.2} per {} days",
                count, agency, first.0, last.0, self.ratio, self.expected, self.window_days
            ))
            .with_metric("window_count", count as f64)
            .with_metric("expected", self.expected)
            .with_metric("ratio", self.ratio)
            .with_metric("window_days", self.window_days as f64)
            .with_metric("baseline_contracts", n)
            .with_metric("baseline_days", self.baseline_days as f64);
        if total > 0.0 {
            finding = finding.with_affected_value(total);
        }
        finding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisc_graph::{NodeId, NodeKind};

    fn contract(key: &str, date: &str) -> ContractFacts {
        ContractFacts {
            id: NodeId::new(NodeKind::Contract, key),
            label: key.to_string(),
            value: Some(100.0),
            date: date.parse().ok(),
            description: None,
            category: None,
            supplier: None,
            supplier_label: None,
            agency: Some(NodeId::new(NodeKind::Agency, "26000")),
            agency_label: Some("MS".to_string()),
        }
    }

    fn year_with_december_rush() -> Vec<ContractFacts> {
        let mut contracts: Vec<_> = (1..=10)
            .map(|m| contract(&format!("M{}", m), &format!("2023-{:02}-15", m)))
            .collect();
        for d in 20..26 {
            contracts.push(contract(&format!("D{}", d), &format!("2023-12-{}", d)));
        }
        contracts
    }

    #[test]
    fn test_year_end_rush_is_a_cluster() {
        let findings = temporal_clusters(&year_with_december_rush(), &AnomalySettings::default());
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.metric("window_count"), Some(6.0));
        assert!(f.metric("ratio").unwrap() >= 3.0);
        assert!(f.references("contract:D20"));
        assert!(f.references("date:2023-12-25"));
        assert!(!f.references("contract:M1"));
        assert_eq!(f.affected_value, Some(600.0));
    }

    #[test]
    fn test_even_spread_is_not_a_cluster() {
        let contracts: Vec<_> = (1..=12)
            .map(|m| contract(&format!("M{}", m), &format!("2023-{:02}-01", m)))
            .collect();
        assert!(temporal_clusters(&contracts, &AnomalySettings::default()).is_empty());
    }

    #[test]
    fn test_no_baseline_span() {
        let contracts: Vec<_> = (1..=5)
            .map(|d| contract(&format!("C{}", d), &format!("2023-12-0{}", d)))
            .collect();
        assert!(temporal_clusters(&contracts, &AnomalySettings::default()).is_empty());
    }
}
