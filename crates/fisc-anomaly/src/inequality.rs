//! Distributional inequality: Gini, Theil, Atkinson
//!
//! Closed forms over a value vector `x` of length `n` with mean `μ`:
//!
//! ```text
//! Gini      G = Σᵢ (2i - n - 1) x₍ᵢ₎ / (n Σ x)          x sorted ascending, i = 1..n
//! Theil     T = (1/n) Σ (x/μ) ln(x/μ)
//! Atkinson  A = 1 - ((1/n) Σ (x/μ)^(1-ε))^(1/(1-ε))    ε ≠ 1
//!           A = 1 - (Π x)^(1/n) / μ                      ε = 1
//! ```
//!
//! Inputs the formula cannot take return `InsufficientData` instead of a
//! number: fewer than two values, non-finite values, negative values, a zero
//! total, and zeros where a logarithm or negative power is involved.

use crate::contracts::{format_brl, ContractFacts};
use crate::finding::{AnomalyFinding, EvidenceRef, FindingKind, Severity};
use fisc_core::AnomalySettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum IndexValue {
    Value(f64),
    InsufficientData(String),
}

impl IndexValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            IndexValue::Value(v) => Some(*v),
            IndexValue::InsufficientData(_) => None,
        }
    }

    fn insufficient(reason: &str) -> Self {
        IndexValue::InsufficientData(reason.to_string())
    }
}

/// Shared precondition: two or more finite, non-negative values with a positive sum
fn check(values: &[f64], strictly_positive: bool) -> Result<f64, IndexValue> {
    if values.len() < 2 {
        return Err(IndexValue::insufficient("fewer than two values"));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(IndexValue::insufficient("non-finite value"));
    }
    if values.iter().any(|v| *v < 0.0) {
        return Err(IndexValue::insufficient("negative value"));
    }
    if strictly_positive && values.iter().any(|v| *v == 0.0) {
        return Err(IndexValue::insufficient("zero value"));
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return Err(IndexValue::insufficient("zero total"));
    }
    Ok(total / values.len() as f64)
}

pub fn gini(values: &[f64]) -> IndexValue {
    if let Err(insufficient) = check(values, false) {
        return insufficient;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    let total: f64 = sorted.iter().sum();
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (2.0 * (i as f64 + 1.0) - n - 1.0) * x)
        .sum();
    IndexValue::Value((weighted / (n * total)).clamp(0.0, 1.0))
}

pub fn theil(values: &[f64]) -> IndexValue {
    let mean = match check(values, true) {
        Ok(mean) => mean,
        Err(insufficient) => return insufficient,
    };
    let n = values.len() as f64;
    let t = values
        .iter()
        .map(|x| {
            let r = x / mean;
            r * r.ln()
        })
        .sum::<f64>()
        / n;
    IndexValue::Value(t.max(0.0))
}

/// `epsilon` is the inequality aversion, `> 0`
pub fn atkinson(values: &[f64], epsilon: f64) -> IndexValue {
    if !(epsilon > 0.0) || !epsilon.is_finite() {
        return IndexValue::insufficient("epsilon must be positive");
    }
    // Zeros are fine while 1 - ε > 0
    let mean = match check(values, epsilon >= 1.0) {
        Ok(mean) => mean,
        Err(insufficient) => return insufficient,
    };
    let n = values.len() as f64;
    let equally_distributed = if (epsilon - 1.0).abs() < 1e-12 {
        (values.iter().map(|x| x.ln()).sum::<f64>() / n).exp()
    } else {
        let power = 1.0 - epsilon;
        let moment = values.iter().map(|x| (x / mean).powf(power)).sum::<f64>() / n;
        mean * moment.powf(1.0 / power)
    };
    IndexValue::Value((1.0 - equally_distributed / mean).clamp(0.0, 1.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InequalityIndices {
    pub count: usize,
    pub gini: IndexValue,
    pub theil: IndexValue,
    pub atkinson: IndexValue,
    pub atkinson_epsilon: f64,
}

impl InequalityIndices {
    pub fn compute(values: &[f64], epsilon: f64) -> Self {
        Self {
            count: values.len(),
            gini: gini(values),
            theil: theil(values),
            atkinson: atkinson(values, epsilon),
            atkinson_epsilon: epsilon,
        }
    }
}

/// Indices over contract value totals per supplier and per agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InequalityReport {
    pub supplier_totals: InequalityIndices,
    pub agency_totals: InequalityIndices,
}

/// Node id → summed contract value
fn totals<'c>(
    contracts: &'c [ContractFacts],
    party: impl Fn(&'c ContractFacts) -> Option<&'c str>,
) -> BTreeMap<&'c str, f64> {
    let mut totals = BTreeMap::new();
    for contract in contracts {
        if let (Some(id), Some(value)) = (party(contract), contract.value) {
            *totals.entry(id).or_insert(0.0) += value;
        }
    }
    totals
}

pub fn inequality_report(contracts: &[ContractFacts], epsilon: f64) -> InequalityReport {
    let suppliers: Vec<f64> = totals(contracts, |c| c.supplier.as_ref().map(|s| s.as_str()))
        .into_values()
        .collect();
    let agencies: Vec<f64> = totals(contracts, |c| c.agency.as_ref().map(|a| a.as_str()))
        .into_values()
        .collect();
    InequalityReport {
        supplier_totals: InequalityIndices::compute(&suppliers, epsilon),
        agency_totals: InequalityIndices::compute(&agencies, epsilon),
    }
}

/// Largest suppliers named as evidence
const TOP_SUPPLIERS: usize = 5;

/// Raised when the Gini over supplier totals passes the configured threshold
pub fn spending_inequality(
    contracts: &[ContractFacts],
    report: &InequalityReport,
    settings: &AnomalySettings,
) -> Option<AnomalyFinding> {
    let gini = report.supplier_totals.gini.value()?;
    if gini < settings.inequality_gini_threshold {
        return None;
    }

    let supplier_totals = totals(contracts, |c| c.supplier.as_ref().map(|s| s.as_str()));
    let grand_total: f64 = supplier_totals.values().sum();
    let mut ranked: Vec<(&str, f64)> = supplier_totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_SUPPLIERS);
    let top_total: f64 = ranked.iter().map(|(_, v)| v).sum();

    let evidence = ranked.iter().map(|(id, _)| EvidenceRef::node(id)).collect();
    let n = report.supplier_totals.count as f64;
    let severity = if gini >= (1.0 + settings.inequality_gini_threshold) / 2.0 {
        Severity::High
    } else {
        Severity::Medium
    };

    let mut finding = AnomalyFinding::new(FindingKind::SpendingInequality, evidence)
        .with_severity(severity)
        .with_confidence(n / (n + 5.0))
        .with_description(format!(
            "Contract value is concentrated among suppliers: Gini {:.2} over {} suppliers, top {} hold {} of {}",
            gini,
            report.supplier_totals.count,
            ranked.len(),
            format_brl(top_total),
            format_brl(grand_total)
        ))
        .with_affected_value(top_total)
        .with_metric("gini", gini)
        .with_metric("suppliers", n)
        .with_metric("top_share", top_total / grand_total);
    if let Some(theil) = report.supplier_totals.theil.value() {
        finding = finding.with_metric("theil", theil);
    }
    if let Some(atkinson) = report.supplier_totals.atkinson.value() {
        finding = finding.with_metric("atkinson", atkinson);
    }
    Some(finding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(index: IndexValue, expected: f64) -> bool {
        index.value().is_some_and(|v| (v - expected).abs() < 1e-9)
    }

    #[test]
    fn test_perfect_equality_is_zero() {
        let equal = [1.0, 1.0, 1.0, 1.0];
        assert_eq!(gini(&equal), IndexValue::Value(0.0));
        assert!(approx(theil(&equal), 0.0));
        assert!(approx(atkinson(&equal, 0.5), 0.0));
        assert!(approx(atkinson(&equal, 1.0), 0.0));
    }

    #[test]
    fn test_single_extreme_value_approaches_one() {
        let mut values = vec![0.0; 999];
        values.push(1_000_000.0);
        let g = gini(&values).value().unwrap();
        assert!((g - 0.999).abs() < 1e-9);

        assert!(approx(gini(&[0.0, 0.0, 0.0, 10.0]), 0.75));
    }

    #[test]
    fn test_known_values() {
        // x = [1, 3], μ = 2
        let values = [1.0, 3.0];
        assert!(approx(gini(&values), 0.25));
        let expected_theil = 0.5 * (0.5 * 0.5f64.ln() + 1.5 * 1.5f64.ln());
        assert!(approx(theil(&values), expected_theil));
        let expected_a1 = 1.0 - 3.0f64.sqrt() / 2.0;
        assert!(approx(atkinson(&values, 1.0), expected_a1));
    }

    #[test]
    fn test_insufficient_data() {
        assert!(matches!(gini(&[]), IndexValue::InsufficientData(_)));
        assert!(matches!(gini(&[5.0]), IndexValue::InsufficientData(_)));
        assert!(matches!(gini(&[0.0, 0.0]), IndexValue::InsufficientData(_)));
        assert!(matches!(gini(&[1.0, -2.0]), IndexValue::InsufficientData(_)));
        assert!(matches!(gini(&[1.0, f64::NAN]), IndexValue::InsufficientData(_)));
        assert!(matches!(theil(&[0.0, 4.0]), IndexValue::InsufficientData(_)));
        assert!(matches!(atkinson(&[0.0, 4.0], 1.5), IndexValue::InsufficientData(_)));
        assert!(atkinson(&[0.0, 4.0], 0.5).value().is_some());
        assert!(matches!(atkinson(&[1.0, 4.0], 0.0), IndexValue::InsufficientData(_)));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(gini(&[1.0])).unwrap();
        assert_eq!(json["status"], "insufficient_data");
        let json = serde_json::to_value(IndexValue::Value(0.5)).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "value", "value": 0.5 }));
    }
}
