//! Price deviation against a peer group
//!
//! Peers are the other valued contracts with the same agency and category.
//! The contract under test is left out of its own baseline, so one extreme
//! value cannot mask itself by inflating the spread.

use crate::contracts::{format_brl, ContractFacts};
use crate::finding::{graded, AnomalyFinding, EvidenceRef, FindingKind, Severity};
use fisc_core::{AnomalySettings, PriceMethod};
use std::collections::BTreeMap;

const SEVERITY_STEPS: [(f64, Severity); 3] = [
    (3.0, Severity::Critical),
    (2.0, Severity::High),
    (1.5, Severity::Medium),
];

/// Excess used when every peer shares one value, grades Critical
const ZERO_SPREAD_EXCESS: f64 = 1.0e6;

struct Deviation {
    /// Distance past the threshold, 1.0 at the threshold
    excess: f64,
    above: bool,
    metrics: Vec<(&'static str, f64)>,
    rule: String,
}

pub fn price_outliers(
    contracts: &[ContractFacts],
    settings: &AnomalySettings,
) -> Vec<AnomalyFinding> {
    let mut groups: BTreeMap<(Option<&str>, Option<&str>), Vec<(&ContractFacts, f64)>> =
        BTreeMap::new();
    for contract in contracts {
        if let Some(value) = contract.value {
            let key = (
                contract.agency.as_ref().map(|a| a.as_str()),
                contract.category.as_deref(),
            );
            groups.entry(key).or_default().push((contract, value));
        }
    }

    let mut findings = Vec::new();
    for members in groups.values() {
        if members.len() <= settings.min_peer_group {
            continue;
        }
        for (i, (contract, value)) in members.iter().enumerate() {
            let peers: Vec<f64> = members
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, (_, v))| *v)
                .collect();
            let deviation = match settings.price_method {
                PriceMethod::ZScore => z_score(*value, &peers, settings.z_threshold),
                PriceMethod::Iqr => iqr_fence(*value, &peers, settings.iqr_multiplier),
            };
            if let Some(deviation) = deviation {
                findings.push(finding(contract, *value, peers.len(), deviation));
            }
        }
    }
    findings
}

fn z_score(value: f64, peers: &[f64], threshold: f64) -> Option<Deviation> {
    let (mean, std) = mean_std(peers)?;
    if std <= f64::EPSILON * mean.abs().max(1.0) {
        return uniform_peers(value, mean, vec![("peer_mean", mean), ("peer_std", 0.0)]);
    }
    let z = (value - mean) / std;
    let excess = z.abs() / threshold;
    (excess >= 1.0).then(|| Deviation {
        excess,
        above: z > 0.0,
        metrics: vec![("peer_mean", mean), ("peer_std", std), ("z_score", z)],
        rule: format!(
            "{:.1} standard deviations {}",
            z.abs(),
            direction(z > 0.0)
        ),
    })
}

fn iqr_fence(value: f64, peers: &[f64], multiplier: f64) -> Option<Deviation> {
    let mut sorted = peers.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25)?;
    let q3 = quantile(&sorted, 0.75)?;
    let iqr = q3 - q1;
    if iqr <= f64::EPSILON * q3.abs().max(1.0) {
        return uniform_peers(value, q3, vec![("q1", q1), ("q3", q3)]);
    }
    let (distance, above) = if value > q3 {
        (value - q3, true)
    } else {
        (q1 - value, false)
    };
    let excess = distance / (iqr * multiplier);
    (excess >= 1.0).then(|| Deviation {
        excess,
        above,
        metrics: vec![
            ("q1", q1),
            ("q3", q3),
            ("lower_fence", q1 - multiplier * iqr),
            ("upper_fence", q3 + multiplier * iqr),
        ],
        rule: format!(
            "{:.1} interquartile ranges {}",
            distance / iqr,
            direction(above)
        ),
    })
}

/// Peers all priced alike: any departure from that price is flagged
fn uniform_peers(
    value: f64,
    common: f64,
    mut metrics: Vec<(&'static str, f64)>,
) -> Option<Deviation> {
    if (value - common).abs() <= f64::EPSILON * common.abs().max(1.0) {
        return None;
    }
    let above = value > common;
    metrics.push(("zero_peer_spread", 1.0));
    Some(Deviation {
        excess: ZERO_SPREAD_EXCESS,
        above,
        metrics,
        rule: format!(
            "{} the common price of {} shared by",
            direction(above),
            format_brl(common)
        ),
    })
}

fn direction(above: bool) -> &'static str {
    if above {
        "above"
    } else {
        "below"
    }
}

fn finding(
    contract: &ContractFacts,
    value: f64,
    peers: usize,
    deviation: Deviation,
) -> AnomalyFinding {
    let mut evidence = vec![EvidenceRef::node(&contract.id)];
    evidence.extend(contract.value_edge().map(EvidenceRef::edge));
    evidence.extend(contract.agency.as_ref().map(EvidenceRef::node));
    evidence.extend(contract.agency_edge().map(EvidenceRef::edge));

    let n = peers as f64;
    let confidence = (0.5 + 0.5 * (1.0 - 1.0 / deviation.excess)) * (n / (n + 1.0));
    let scope = match (&contract.agency_label, &contract.category) {
        (Some(agency), Some(category)) => format!(" ({}, {})", agency, category),
        (Some(agency), None) => format!(" ({})", agency),
        (None, Some(category)) => format!(" ({})", category),
        (None, None) => String::new(),
    };

    let mut finding = AnomalyFinding::new(FindingKind::PriceOutlier, evidence)
        .with_severity(graded(deviation.excess, SEVERITY_STEPS))
        .with_confidence(confidence)
        .with_description(format!(
            "Contract {} valued at {} is {} its {} peer contracts{}",
            contract.label,
            format_brl(value),
            deviation.rule,
            peers,
            scope
        ))
        .with_affected_value(value)
        .with_metric("value", value)
        .with_metric("peers", n);
    for (name, metric) in deviation.metrics {
        finding = finding.with_metric(name, metric);
    }
    finding
}

/// Mean and sample standard deviation; needs two values
pub(crate) fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Linear interpolation between closest ranks over sorted values
pub(crate) fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = q * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisc_graph::{NodeId, NodeKind};

    fn contract(key: &str, value: f64) -> ContractFacts {
        ContractFacts {
            id: NodeId::new(NodeKind::Contract, key),
            label: key.to_string(),
            value: Some(value),
            date: None,
            description: None,
            category: Some("Pregão".to_string()),
            supplier: None,
            supplier_label: None,
            agency: Some(NodeId::new(NodeKind::Agency, "26000")),
            agency_label: Some("Ministério da Saúde".to_string()),
        }
    }

    fn group(outlier: f64) -> Vec<ContractFacts> {
        let mut contracts: Vec<_> = [100.0, 104.0, 98.0, 101.0, 97.0, 103.0]
            .iter()
            .enumerate()
            .map(|(i, v)| contract(&format!("CT{}", i), *v))
            .collect();
        contracts.push(contract("CTX", outlier));
        contracts
    }

    #[test]
    fn test_z_score_flags_only_the_outlier() {
        let findings = price_outliers(&group(500.0), &AnomalySettings::default());
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert!(f.references("contract:CTX"));
        assert!(f.references("agency:26000"));
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.metric("z_score").unwrap() > 2.5);
        assert_eq!(f.affected_value, Some(500.0));
        assert!(f.description.contains("above"));
    }

    #[test]
    fn test_iqr_method() {
        let settings = AnomalySettings {
            price_method: PriceMethod::Iqr,
            ..AnomalySettings::default()
        };
        let findings = price_outliers(&group(5.0), &settings);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].description.contains("below"));
        assert!(findings[0].metric("lower_fence").is_some());
    }

    #[test]
    fn test_small_or_flat_groups_are_skipped() {
        let settings = AnomalySettings::default();
        let small: Vec<_> = group(500.0).into_iter().skip(4).collect();
        assert!(price_outliers(&small, &settings).is_empty());

        let flat: Vec<_> = (0..6).map(|i| contract(&format!("CT{}", i), 100.0)).collect();
        assert!(price_outliers(&flat, &settings).is_empty());
    }

    #[test]
    fn test_departure_from_identical_peers_is_critical() {
        let mut contracts: Vec<_> = (0..6)
            .map(|i| contract(&format!("CT{}", i), 100.0))
            .collect();
        contracts.push(contract("CTX", 1_000_000.0));

        for method in [PriceMethod::ZScore, PriceMethod::Iqr] {
            let settings = AnomalySettings {
                price_method: method,
                ..AnomalySettings::default()
            };
            let findings = price_outliers(&contracts, &settings);
            assert_eq!(findings.len(), 1);
            let f = &findings[0];
            assert!(f.references("contract:CTX"));
            assert_eq!(f.severity, Severity::Critical);
            assert_eq!(f.metric("zero_peer_spread"), Some(1.0));
            assert!(f.confidence > 0.8);
            assert!(f.description.contains("above the common price"));
            assert!(serde_json::to_string(f).is_ok());
        }
    }

    #[test]
    fn test_quantiles() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&sorted, 0.25), Some(2.0));
        assert_eq!(quantile(&sorted, 0.5), Some(3.0));
        assert_eq!(quantile(&[], 0.5), None);
    }
}
