//! Canonical keys and value parsing
//!
//! Sources disagree on formatting: `11.222.333/0001-81` and `11222333000181`
//! are the same supplier, `26000` and ` 26000 ` the same agency, and
//! `"R$ 1.234,50"` the same amount as `1234.5`. Everything here folds those
//! spellings onto one representation before nodes are compared.

use chrono::NaiveDate;
use serde_json::Value;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Digits of a CNPJ (14) or CPF (11); `None` for any other length
pub fn document_key(value: &Value) -> Option<String> {
    let digits: String = text(value)?.chars().filter(char::is_ascii_digit).collect();
    matches!(digits.len(), 11 | 14).then_some(digits)
}

/// Uppercase alphanumerics of an identifier code (`ct-001/2024` → `CT0012024`)
pub fn code_key(value: &Value) -> Option<String> {
    let key: String = text(value)?
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    (!key.is_empty()).then_some(key)
}

/// Accent-folded uppercase words joined by single spaces
pub fn name_key(value: &Value) -> Option<String> {
    let folded: String = text(value)?
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_uppercase();
    let key = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    (!key.is_empty()).then_some(key)
}

/// Monetary amount from a JSON number or a Brazilian/plain formatted string
pub fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_amount_text(s)?,
        _ => return None,
    };
    amount.is_finite().then_some(amount)
}

fn parse_amount_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        // Whichever separator comes last is the decimal mark
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => {
            if cleaned.matches(',').count() == 1 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) if is_thousands_grouped(&cleaned, '.') => cleaned.replace('.', ""),
        _ => cleaned,
    };
    normalized.parse().ok()
}

/// `1.500` and `2.000.000` are grouped thousands; `1500.75` is not
fn is_thousands_grouped(s: &str, sep: char) -> bool {
    let mut groups = s.trim_start_matches('-').split(sep);
    let head = groups.next().unwrap_or_default();
    let tail: Vec<&str> = groups.collect();
    (1..=3).contains(&head.len())
        && !tail.is_empty()
        && tail.iter().all(|g| g.len() == 3)
        && (tail.len() > 1 || head != "0")
}

/// Calendar date from `dd/mm/yyyy`, `yyyy-mm-dd` or an ISO datetime
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    let date_part = match raw.char_indices().nth(10) {
        Some((i, 'T' | ' ')) => &raw[..i],
        _ => raw,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d/%m/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%d-%m-%Y"))
        .ok()
}

/// Key of a MonetaryValue node: integer cents
pub fn amount_key(amount: f64) -> String {
    format!("{}", (amount * 100.0).round() as i64)
}

/// Free text of a scalar, trimmed; objects and arrays have none
pub fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}
