//! Supplier concentration per agency

use crate::contracts::{format_brl, ContractFacts};
use crate::finding::{graded, AnomalyFinding, EvidenceRef, FindingKind, Severity};
use fisc_core::AnomalySettings;
use std::collections::BTreeMap;

#[derive(Default)]
struct SupplierShare<'c> {
    total: f64,
    contracts: Vec<&'c ContractFacts>,
}

/// Herfindahl–Hirschman index on the 0..10 000 scale
pub fn hhi(shares: impl IntoIterator<Item = f64>) -> f64 {
    shares.into_iter().map(|s| (s * 100.0).powi(2)).sum()
}

pub fn supplier_concentration(
    contracts: &[ContractFacts],
    settings: &AnomalySettings,
) -> Vec<AnomalyFinding> {
    let mut by_agency: BTreeMap<&str, Vec<&ContractFacts>> = BTreeMap::new();
    for contract in contracts {
        if let (Some(agency), Some(_), Some(value)) =
            (&contract.agency, &contract.supplier, contract.value)
        {
            if value > 0.0 {
                by_agency.entry(agency.as_str()).or_default().push(contract);
            }
        }
    }

    let mut findings = Vec::new();
    for members in by_agency.values() {
        if members.len() < settings.min_agency_contracts {
            continue;
        }
        let agency_total: f64 = members.iter().filter_map(|c| c.value).sum();
        let mut suppliers: BTreeMap<&str, SupplierShare> = BTreeMap::new();
        for &contract in members.iter() {
            if let Some(supplier) = &contract.supplier {
                let entry = suppliers.entry(supplier.as_str()).or_default();
                entry.total += contract.value.unwrap_or_default();
                entry.contracts.push(contract);
            }
        }

        let agency = AgencyTotals {
            total: agency_total,
            contracts: members.len(),
            suppliers: suppliers.len(),
            hhi: hhi(suppliers.values().map(|s| s.total / agency_total)),
        };
        for share in suppliers.values() {
            if share.total / agency_total > settings.concentration_ratio {
                findings.push(finding(share, &agency, settings));
            }
        }
    }
    findings
}

struct AgencyTotals {
    total: f64,
    contracts: usize,
    suppliers: usize,
    hhi: f64,
}

fn finding(
    share: &SupplierShare,
    agency: &AgencyTotals,
    settings: &AnomalySettings,
) -> AnomalyFinding {
    let ratio = share.total / agency.total;
    let first = share.contracts[0];
    let mut evidence = Vec::new();
    evidence.extend(first.agency.as_ref().map(EvidenceRef::node));
    evidence.extend(first.supplier.as_ref().map(EvidenceRef::node));
    for contract in &share.contracts {
        evidence.extend(contract.supplier_edge().map(EvidenceRef::edge));
        evidence.extend(contract.agency_edge().map(EvidenceRef::edge));
    }

    // Room between the threshold and a monopoly
    let headroom = (1.0 - settings.concentration_ratio).max(f64::EPSILON);
    let excess = (ratio - settings.concentration_ratio) / headroom;
    let severity = if agency.suppliers == 1 {
        Severity::High
    } else {
        graded(excess, [(0.75, Severity::High), (0.25, Severity::Medium), (0.0, Severity::Low)])
    };
    let n = agency.contracts as f64;

    AnomalyFinding::new(FindingKind::SupplierConcentration, evidence)
        .with_severity(severity)
        .with_confidence((0.6 + 0.4 * excess.min(1.0)) * (n / (n + 2.0)))
        .with_description(format!(
            "Supplier {} holds {:.1}% of {} across {} of {} contracts with {} (HHI {:.0})",
            first.supplier_label.as_deref().unwrap_or("?"),
            ratio * 100.0,
            format_brl(agency.total),
            share.contracts.len(),
            agency.contracts,
            first.agency_label.as_deref().unwrap_or("?"),
            agency.hhi
        ))
        .with_affected_value(share.total)
        .with_metric("share", ratio)
        .with_metric("hhi", agency.hhi)
        .with_metric("supplier_total", share.total)
        .with_metric("agency_total", agency.total)
        .with_metric("agency_contracts", n)
        .with_metric("suppliers", agency.suppliers as f64)
}
