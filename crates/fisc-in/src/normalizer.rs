//! Text normalization for query analysis.
//!
//! - Lowercase + accent folding (NFD, combining marks removed)
//! - Whitespace normalization
//! - Portuguese abbreviation expansion
//! - Common typo correction
//! - Brazilian number parsing with unit multipliers

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use unicode_normalization::char::{decompose_canonical, is_combining_mark};

lazy_static! {
    /// Abbreviations frequent in public-spending questions
    static ref ABBREVIATIONS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"\bmin\.\s*").unwrap(), "ministerio "),
        (Regex::new(r"\bpref\.\s*").unwrap(), "prefeitura "),
        (Regex::new(r"\bgov\.\s*").unwrap(), "governo "),
        (Regex::new(r"\bsec\.\s*").unwrap(), "secretaria "),
        (Regex::new(r"\bfed\.\s*").unwrap(), "federal "),
    ];

    static ref TYPO_CORRECTIONS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("contrado", "contrato");
        m.insert("lictacao", "licitacao");
        m.insert("fornecdor", "fornecedor");
        m.insert("fornecedorees", "fornecedores");
        m.insert("despeza", "despesa");
        m.insert("despezas", "despesas");
        m.insert("anomalis", "anomalias");
        m.insert("orcamentro", "orcamento");
        m
    };

    static ref MULTI_SPACE: Regex = Regex::new(r"\s+").unwrap();

    /// Multipliers applied before the numeric literal is parsed
    static ref UNIT_MULTIPLIERS: HashMap<&'static str, f64> = {
        let mut m = HashMap::new();
        m.insert("mil", 1e3);
        m.insert("k", 1e3);
        m.insert("mi", 1e6);
        m.insert("milhao", 1e6);
        m.insert("milhoes", 1e6);
        m.insert("bi", 1e9);
        m.insert("bilhao", 1e9);
        m.insert("bilhoes", 1e9);
        m.insert("tri", 1e12);
        m.insert("trilhao", 1e12);
        m.insert("trilhoes", 1e12);
        m
    };

    static ref THOUSANDS_GROUPED: Regex = Regex::new(r"^\d{1,3}(\.\d{3})+$").unwrap();
}

/// Lowercase and strip accents: "São Paulo" → "sao paulo"
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_folded(c, &mut out);
    }
    out
}

fn push_folded(c: char, out: &mut String) {
    for lower in c.to_lowercase() {
        decompose_canonical(lower, |d| {
            if !is_combining_mark(d) {
                out.push(d);
            }
        });
    }
}

/// Folded text that remembers where each byte came from in the original.
#[derive(Debug, Clone)]
pub struct FoldedText {
    pub text: String,
    /// `offsets[i]` is the original byte offset of folded byte `i`
    offsets: Vec<usize>,
    original_len: usize,
}

impl FoldedText {
    pub fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut offsets = Vec::with_capacity(original.len());
        for (idx, c) in original.char_indices() {
            let before = text.len();
            push_folded(c, &mut text);
            offsets.extend(std::iter::repeat(idx).take(text.len() - before));
        }
        Self {
            text,
            offsets,
            original_len: original.len(),
        }
    }

    /// Map a folded byte range back to the original text
    pub fn original_span(&self, start: usize, end: usize) -> (usize, usize) {
        let orig_start = self.offsets.get(start).copied().unwrap_or(self.original_len);
        let orig_end = if end >= self.offsets.len() {
            self.original_len
        } else {
            self.offsets[end]
        };
        (orig_start, orig_end.max(orig_start))
    }
}

/// Normalize text for intent matching
pub fn normalize(text: &str) -> String {
    let mut result = fold(text.trim());

    for (pattern, expansion) in ABBREVIATIONS.iter() {
        result = pattern.replace_all(&result, *expansion).to_string();
    }

    result = result
        .split_whitespace()
        .map(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
            match TYPO_CORRECTIONS.get(bare) {
                Some(fixed) => word.replacen(bare, fixed, 1),
                None => word.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    result = MULTI_SPACE.replace_all(&result, " ").trim().to_string();

    while result.ends_with(|c: char| matches!(c, '.' | '?' | '!' | ';')) {
        result.pop();
    }

    result
}

/// Multiplier for a (folded) unit word
pub fn unit_multiplier(unit: &str) -> Option<f64> {
    UNIT_MULTIPLIERS.get(fold(unit).as_str()).copied()
}

/// Parse a Brazilian-formatted numeric literal.
///
/// `,` is the decimal separator and `.` groups thousands ("1.234.567,89").
/// With a unit multiplier present a lone `.` followed by one or two digits
/// is read as a decimal point ("1.5 milhão").
pub fn parse_brl_number(literal: &str, has_multiplier: bool) -> Option<f64> {
    let compact: String = literal.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let canonical = if compact.contains(',') {
        compact.replace('.', "").replace(',', ".")
    } else if compact.contains('.') {
        let decimals = compact.rsplit('.').next().map(str::len).unwrap_or(0);
        let single_dot = compact.matches('.').count() == 1;
        if has_multiplier && single_dot && decimals <= 2 {
            compact
        } else if THOUSANDS_GROUPED.is_match(&compact) {
            compact.replace('.', "")
        } else {
            compact
        }
    } else {
        compact
    };

    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a monetary literal plus optional unit into BRL, rounded to cents
pub fn parse_amount(literal: &str, unit: Option<&str>) -> Option<f64> {
    let multiplier = match unit {
        Some(u) => unit_multiplier(u)?,
        None => 1.0,
    };
    let base = parse_brl_number(literal, unit.is_some())?;
    Some(((base * multiplier) * 100.0).round() / 100.0)
}

/// Check if text is too short to carry an investigation request
pub fn is_too_vague(text: &str) -> bool {
    let normalized = normalize(text);
    normalized.split_whitespace().count() < 2 || normalized.len() < 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_normalization() {
        assert_eq!(normalize("  Contratos da SAÚDE  "), "contratos da saude");
        assert_eq!(normalize("Licitações em São Paulo?"), "licitacoes em sao paulo");
    }

    #[test]
    fn test_abbreviation_expansion() {
        assert_eq!(normalize("gastos do Min. da Saúde"), "gastos do ministerio da saude");
        assert_eq!(normalize("contratos da pref. de Recife"), "contratos da prefeitura de recife");
    }

    #[test]
    fn test_typo_correction() {
        assert_eq!(normalize("contrado suspeito"), "contrato suspeito");
        assert_eq!(normalize("despezas, 2023"), "despesas, 2023");
    }

    #[test]
    fn test_folded_offsets_map_back() {
        let original = "Gastos em São Paulo";
        let folded = FoldedText::new(original);
        assert_eq!(folded.text, "gastos em sao paulo");
        let start = folded.text.find("sao paulo").unwrap();
        let (s, e) = folded.original_span(start, start + "sao paulo".len());
        assert_eq!(&original[s..e], "São Paulo");
    }

    #[test]
    fn test_money_units() {
        assert_eq!(parse_amount("1", Some("milhão")), Some(1_000_000.0));
        assert_eq!(parse_amount("500", Some("mil")), Some(500_000.0));
        assert_eq!(parse_amount("1,5", Some("bilhões")), Some(1_500_000_000.0));
        assert_eq!(parse_amount("2.5", Some("mi")), Some(2_500_000.0));
        assert_eq!(parse_amount("1.234.567,89", None), Some(1_234_567.89));
        assert_eq!(parse_amount("10.000", None), Some(10_000.0));
        assert_eq!(parse_amount("3", Some("dúzias")), None);
    }

    #[test]
    fn test_vague_detection() {
        assert!(is_too_vague("oi"));
        assert!(!is_too_vague("contratos de 2023"));
    }
}
