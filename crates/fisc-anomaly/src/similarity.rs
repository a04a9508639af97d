//! Near-duplicate contract descriptions
//!
//! Similarity is the larger of token-set Jaccard and normalized Levenshtein
//! over accent-folded lowercase text. Pairs whose lengths already rule out
//! the threshold skip the edit-distance pass.

use crate::contracts::ContractFacts;
use crate::finding::{AnomalyFinding, EvidenceRef, FindingKind, Severity};
use fisc_core::AnomalySettings;
use std::collections::BTreeSet;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Descriptions shorter than this many tokens are too generic to compare
const MIN_TOKENS: usize = 3;

struct Prepared<'c> {
    contract: &'c ContractFacts,
    text: Vec<char>,
    tokens: BTreeSet<String>,
}

/// Lowercase, accents folded, punctuation to spaces, whitespace collapsed
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Character edit distance (insert, delete, substitute)
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// `1 - distance / longer length`; 1.0 for two empty strings
pub fn edit_similarity(a: &[char], b: &[char]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

pub fn near_duplicates(
    contracts: &[ContractFacts],
    settings: &AnomalySettings,
) -> Vec<AnomalyFinding> {
    let mut prepared: Vec<Prepared> = contracts
        .iter()
        .filter_map(|contract| {
            let text = normalize(contract.description.as_deref()?);
            let tokens: BTreeSet<String> = text.split(' ').map(str::to_string).collect();
            (tokens.len() >= MIN_TOKENS).then(|| Prepared {
                contract,
                text: text.chars().collect(),
                tokens,
            })
        })
        .collect();
    if prepared.len() > settings.max_pairwise_contracts {
        debug!(
            eligible = prepared.len(),
            compared = settings.max_pairwise_contracts,
            "Near-duplicate scan limited"
        );
        prepared.truncate(settings.max_pairwise_contracts);
    }

    let threshold = settings.similarity_threshold;
    let mut findings = Vec::new();
    for (i, a) in prepared.iter().enumerate() {
        for b in &prepared[i + 1..] {
            let token_score = jaccard(&a.tokens, &b.tokens);
            let (short, long) = (a.text.len().min(b.text.len()), a.text.len().max(b.text.len()));
            let edit_score = if long > 0 && short as f64 / long as f64 >= threshold {
                edit_similarity(&a.text, &b.text)
            } else {
                0.0
            };
            let similarity = token_score.max(edit_score);
            if similarity >= threshold {
                findings.push(finding(a.contract, b.contract, similarity, token_score, edit_score));
            }
        }
    }
    findings
}

fn finding(
    a: &ContractFacts,
    b: &ContractFacts,
    similarity: f64,
    token_score: f64,
    edit_score: f64,
) -> AnomalyFinding {
    let same_supplier = a.supplier.is_some() && a.supplier == b.supplier;
    let same_agency = a.agency.is_some() && a.agency == b.agency;
    let severity = match (same_supplier, same_agency) {
        (true, true) => Severity::High,
        (true, false) | (false, true) => Severity::Medium,
        (false, false) => Severity::Low,
    };

    let mut evidence = vec![EvidenceRef::node(&a.id), EvidenceRef::node(&b.id)];
    if same_supplier {
        evidence.extend(a.supplier.as_ref().map(EvidenceRef::node));
        evidence.extend(a.supplier_edge().map(EvidenceRef::edge));
        evidence.extend(b.supplier_edge().map(EvidenceRef::edge));
    }
    if same_agency {
        evidence.extend(a.agency.as_ref().map(EvidenceRef::node));
    }

    let combined = a.value.unwrap_or_default() + b.value.unwrap_or_default();
    let mut finding = AnomalyFinding::new(FindingKind::NearDuplicate, evidence)
        .with_severity(severity)
        .with_confidence(similarity)
        .with_description(format!(
            "Contracts {} and {} have {:.0}% similar descriptions{}",
            a.label,
            b.label,
            similarity * 100.0,
            if same_supplier { " and the same supplier" } else { "" }
        ))
        .with_metric("similarity", similarity)
        .with_metric("jaccard", token_score)
        .with_metric("edit_similarity", edit_score);
    if combined > 0.0 {
        finding = finding
            .with_affected_value(combined)
            .with_metric("combined_value", combined);
    }
    finding
}
