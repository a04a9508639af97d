//! Entity extraction for investigation queries.
//!
//! Extracts, in fixed precedence order:
//! 1. Document identifiers (CNPJ, CPF) with check-digit validation
//! 2. Monetary amounts, unit multiplier applied before the literal is parsed
//! 3. Regions (full name, UF abbreviation, IBGE code), longest match wins
//! 4. Date ranges, explicit ranges before single dates before bare years
//! 5. Org codes and federal body names
//!
//! A span claimed by an earlier pass is never reused by a later one.
//! Ambiguous or unmatched spans are dropped; extraction never fails.

use chrono::{Datelike, NaiveDate, Utc};
use fisc_core::{DocumentKind, EntityKind, EntityValue, ExtractedEntity, QueryFilters, Span};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use tracing::debug;

use crate::gazetteer::{self, FederalBody, Region, ACCENT_REQUIRED, FEDERAL_BODIES};
use crate::normalizer::{fold, parse_amount, FoldedText};

const UNITS: &str = r"milhoes|milhao|mil|mi|bilhoes|bilhao|bi|trilhoes|trilhao|tri|k";
const MONTHS: &str =
    r"janeiro|fevereiro|marco|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro";
const DATE_TOKEN: &str = r"\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{2}-\d{2}";

lazy_static! {
    static ref CNPJ: Regex = Regex::new(r"\b\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}\b").unwrap();
    static ref CPF: Regex = Regex::new(r"\b\d{3}\.?\d{3}\.?\d{3}-?\d{2}\b").unwrap();

    static ref MONEY_PREFIXED: Regex = Regex::new(&format!(
        r"r\$\s*(?P<num>\d+(?:[.,]\d+)*)(?:\s*(?P<unit>{UNITS})\b)?(?:\s+(?:de\s+)?reais\b)?"
    )).unwrap();
    static ref MONEY_SUFFIXED: Regex = Regex::new(&format!(
        r"\b(?P<num>\d+(?:[.,]\d+)*)(?:\s*(?P<unit>{UNITS})\b)?\s*(?:de\s+)?reais\b"
    )).unwrap();
    /// Large unit words are unambiguous even without a currency marker
    static ref MONEY_LARGE_UNIT: Regex = Regex::new(
        r"\b(?P<num>\d+(?:[.,]\d+)*)\s*(?P<unit>milhoes|milhao|bilhoes|bilhao|trilhoes|trilhao)\b"
    ).unwrap();

    static ref UF_ABBREVIATION: Regex = Regex::new(r"\b[A-Z]{2}\b").unwrap();
    static ref UF_KEYWORD: Regex = Regex::new(r"\b(?:uf|estado)\s*(?P<uf>[a-z]{2})\b").unwrap();
    static ref IBGE_CODE: Regex = Regex::new(r"\b(?:codigo\s+)?ibge\s*(?P<code>\d{2})\b").unwrap();

    static ref EXPLICIT_RANGE: Regex = Regex::new(&format!(
        r"(?:\b(?:de|entre)\s+)?(?P<a>{DATE_TOKEN})\s*(?:-|a|ate|e)\s*(?P<b>{DATE_TOKEN})"
    )).unwrap();
    static ref YEAR_RANGE: Regex = Regex::new(
        r"\b(?:(?:de|entre)\s+)?(?P<a>(?:19|20)\d{2})(?:\s*-\s*|\s+(?:a|ate|e)\s+)(?P<b>(?:19|20)\d{2})\b"
    ).unwrap();
    static ref MONTH_RANGE: Regex = Regex::new(&format!(
        r"\b(?:(?:de|entre)\s+)?(?P<m1>{MONTHS})\s+(?:a|ate|e)\s+(?P<m2>{MONTHS})\s+(?:de\s+)?(?P<y>(?:19|20)\d{{2}})\b"
    )).unwrap();
    static ref SINGLE_DATE: Regex = Regex::new(&format!(r"\b(?P<d>{DATE_TOKEN})\b")).unwrap();
    static ref MONTH_YEAR: Regex = Regex::new(&format!(
        r"\b(?P<m>{MONTHS})\s+(?:de\s+)?(?P<y>(?:19|20)\d{{2}})\b"
    )).unwrap();
    static ref NUMERIC_MONTH_YEAR: Regex = Regex::new(
        r"\b(?P<m>\d{1,2})/(?P<y>(?:19|20)\d{2})\b"
    ).unwrap();
    static ref BARE_YEAR: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").unwrap();

    static ref ORG_CODE: Regex = Regex::new(
        r"\b(?:orgao|siafi|ug|unidade gestora)\s*(?:n[oº°]?\.?\s*|codigo\s*)?(?P<code>\d{5,6})\b"
    ).unwrap();
    static ref ORG_ACRONYM: Regex = Regex::new(&format!(
        r"\b(?:{})\b",
        FEDERAL_BODIES
            .iter()
            .filter_map(|b| b.acronym)
            .collect::<Vec<_>>()
            .join("|")
    )).unwrap();
}

// ============================================================================
// DOCUMENT CHECK DIGITS
// ============================================================================

fn digits_of(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|w| w[0] == w[1])
}

fn mod11_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let rest = sum % 11;
    if rest < 2 {
        0
    } else {
        11 - rest
    }
}

/// Validate a digits-only CNPJ
pub fn is_valid_cnpj(digits: &str) -> bool {
    let d: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != 14 || digits.len() != 14 || all_same(&d) {
        return false;
    }
    const W1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    const W2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
    mod11_digit(&d[..12], &W1) == d[12] && mod11_digit(&d[..13], &W2) == d[13]
}

/// Validate a digits-only CPF
pub fn is_valid_cpf(digits: &str) -> bool {
    let d: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != 11 || digits.len() != 11 || all_same(&d) {
        return false;
    }
    let check = |len: usize| {
        let sum: u32 = d[..len]
            .iter()
            .enumerate()
            .map(|(i, v)| v * (len as u32 + 1 - i as u32))
            .sum();
        (sum * 10 % 11) % 10
    };
    check(9) == d[9] && check(10) == d[10]
}

// ============================================================================
// DATES
// ============================================================================

fn month_number(name: &str) -> Option<u32> {
    MONTHS
        .split('|')
        .position(|m| m == name)
        .map(|i| i as u32 + 1)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

/// Parse `dd/mm/yyyy` or ISO `yyyy-mm-dd`
pub fn parse_date(token: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(token, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y-%m-%d"))
        .ok()
}

fn ordered(a: NaiveDate, b: NaiveDate) -> EntityValue {
    EntityValue::DateRange {
        start: a.min(b),
        end: a.max(b),
    }
}

type DateBuilder = fn(&Captures) -> Option<EntityValue>;

fn explicit_range(caps: &Captures) -> Option<EntityValue> {
    let a = parse_date(caps.name("a")?.as_str())?;
    let b = parse_date(caps.name("b")?.as_str())?;
    Some(ordered(a, b))
}

fn year_range(caps: &Captures) -> Option<EntityValue> {
    let a: i32 = caps.name("a")?.as_str().parse().ok()?;
    let b: i32 = caps.name("b")?.as_str().parse().ok()?;
    let (start, _) = year_bounds(a.min(b))?;
    let (_, end) = year_bounds(a.max(b))?;
    Some(ordered(start, end))
}

fn month_range(caps: &Captures) -> Option<EntityValue> {
    let year: i32 = caps.name("y")?.as_str().parse().ok()?;
    let m1 = month_number(caps.name("m1")?.as_str())?;
    let m2 = month_number(caps.name("m2")?.as_str())?;
    let start = NaiveDate::from_ymd_opt(year, m1.min(m2), 1)?;
    let end = last_day_of_month(year, m1.max(m2))?;
    Some(ordered(start, end))
}

fn single_date(caps: &Captures) -> Option<EntityValue> {
    let d = parse_date(caps.name("d")?.as_str())?;
    Some(ordered(d, d))
}

fn whole_month(year: i32, month: u32) -> Option<EntityValue> {
    Some(ordered(
        NaiveDate::from_ymd_opt(year, month, 1)?,
        last_day_of_month(year, month)?,
    ))
}

fn month_of_year(caps: &Captures) -> Option<EntityValue> {
    let year: i32 = caps.name("y")?.as_str().parse().ok()?;
    whole_month(year, month_number(caps.name("m")?.as_str())?)
}

fn numeric_month_of_year(caps: &Captures) -> Option<EntityValue> {
    let year: i32 = caps.name("y")?.as_str().parse().ok()?;
    whole_month(year, caps.name("m")?.as_str().parse().ok()?)
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Rule-based extractor over a folded copy of the query.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    region_names: Vec<(String, &'static Region)>,
    body_names: Vec<(String, &'static FederalBody)>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Claimed spans, in original-text byte offsets
struct Claims {
    spans: Vec<Span>,
}

impl Claims {
    fn claim(&mut self, span: Span) -> bool {
        if span.is_empty() || self.spans.iter().any(|s| s.overlaps(&span)) {
            return false;
        }
        self.spans.push(span);
        true
    }
}

struct Pass<'a> {
    original: &'a str,
    folded: FoldedText,
    claims: Claims,
    out: Vec<ExtractedEntity>,
}

impl<'a> Pass<'a> {
    fn span_of(&self, start: usize, end: usize) -> Span {
        let (s, e) = self.folded.original_span(start, end);
        Span::new(s, e)
    }

    /// Claim a folded range and record the value; false when the span is taken
    fn accept(&mut self, start: usize, end: usize, value: Option<EntityValue>) -> bool {
        let span = self.span_of(start, end);
        if !self.claims.claim(span) {
            return false;
        }
        if let Some(value) = value {
            self.out.push(ExtractedEntity::new(value, Some(span)));
        }
        true
    }

    fn is_free(&self, start: usize, end: usize) -> bool {
        let span = self.span_of(start, end);
        !self.claims.spans.iter().any(|s| s.overlaps(&span))
    }
}

fn bounded_by_non_word(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

impl EntityExtractor {
    pub fn new() -> Self {
        let mut body_names: Vec<(String, &'static FederalBody)> =
            FEDERAL_BODIES.iter().map(|b| (fold(b.name), b)).collect();
        body_names.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            region_names: gazetteer::region_names_longest_first(),
            body_names,
        }
    }

    /// Extract all entities, ordered by position in the text
    pub fn extract(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut pass = Pass {
            original: text,
            folded: FoldedText::new(text),
            claims: Claims { spans: Vec::new() },
            out: Vec::new(),
        };

        self.documents(&mut pass);
        self.money(&mut pass);
        self.regions(&mut pass);
        self.dates(&mut pass);
        self.orgs(&mut pass);

        let mut entities = pass.out;
        entities.sort_by_key(|e| e.span.map(|s| s.start).unwrap_or(usize::MAX));
        debug!(count = entities.len(), "Extracted entities");
        entities
    }

    fn documents(&self, pass: &mut Pass) {
        let text = pass.folded.text.clone();
        for (regex, kind) in [(&*CNPJ, DocumentKind::Cnpj), (&*CPF, DocumentKind::Cpf)] {
            for m in regex.find_iter(&text) {
                let digits = digits_of(m.as_str());
                let valid = match kind {
                    DocumentKind::Cnpj => is_valid_cnpj(&digits),
                    DocumentKind::Cpf => is_valid_cpf(&digits),
                };
                // Invalid candidates still claim their span so the digits are not reread
                let value = valid.then(|| EntityValue::Document { kind, digits });
                if !valid {
                    debug!(candidate = m.as_str(), "Dropping document with bad check digits");
                }
                pass.accept(m.start(), m.end(), value);
            }
        }
    }

    fn money(&self, pass: &mut Pass) {
        let text = pass.folded.text.clone();
        for regex in [&*MONEY_PREFIXED, &*MONEY_SUFFIXED, &*MONEY_LARGE_UNIT] {
            for caps in regex.captures_iter(&text) {
                let Some(whole) = caps.get(0) else { continue };
                let num = caps.name("num").map(|m| m.as_str()).unwrap_or_default();
                let unit = caps.name("unit").map(|m| m.as_str());
                let value = parse_amount(num, unit).map(|amount| EntityValue::Money { amount });
                if value.is_some() {
                    pass.accept(whole.start(), whole.end(), value);
                }
            }
        }
    }

    fn regions(&self, pass: &mut Pass) {
        let text = pass.folded.text.clone();

        for (name, region) in &self.region_names {
            let mut from = 0;
            while let Some(offset) = text[from..].find(name.as_str()) {
                let start = from + offset;
                let end = start + name.len();
                from = end;
                if !bounded_by_non_word(&text, start, end) {
                    continue;
                }
                if ACCENT_REQUIRED.contains(&name.as_str()) {
                    let span = pass.span_of(start, end);
                    if pass.original[span.start..span.end].is_ascii() {
                        continue;
                    }
                }
                pass.accept(start, end, Some(region.to_entity_value()));
            }
        }

        for caps in UF_KEYWORD.captures_iter(&text) {
            if let (Some(whole), Some(uf)) = (caps.get(0), caps.name("uf")) {
                if let Some(region) = gazetteer::region_by_uf(uf.as_str()) {
                    pass.accept(whole.start(), whole.end(), Some(region.to_entity_value()));
                }
            }
        }

        for caps in IBGE_CODE.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            let region = caps
                .name("code")
                .and_then(|c| c.as_str().parse::<u8>().ok())
                .and_then(gazetteer::region_by_code);
            if let Some(region) = region {
                pass.accept(whole.start(), whole.end(), Some(region.to_entity_value()));
            }
        }

        // Bare abbreviations only count when written in capitals inside mixed-case text
        if pass.original.chars().any(char::is_lowercase) {
            let original = pass.original;
            for m in UF_ABBREVIATION.find_iter(original) {
                if let Some(region) = gazetteer::region_by_uf(m.as_str()) {
                    let span = Span::new(m.start(), m.end());
                    if pass.claims.claim(span) {
                        pass.out
                            .push(ExtractedEntity::new(region.to_entity_value(), Some(span)));
                    }
                }
            }
        }
    }

    fn dates(&self, pass: &mut Pass) {
        let text = pass.folded.text.clone();

        let rules: [(&Regex, DateBuilder); 6] = [
            (&*EXPLICIT_RANGE, explicit_range as DateBuilder),
            (&*YEAR_RANGE, year_range as DateBuilder),
            (&*MONTH_RANGE, month_range as DateBuilder),
            (&*SINGLE_DATE, single_date as DateBuilder),
            (&*MONTH_YEAR, month_of_year as DateBuilder),
            (&*NUMERIC_MONTH_YEAR, numeric_month_of_year as DateBuilder),
        ];

        for (regex, build) in rules {
            for caps in regex.captures_iter(&text) {
                let Some(whole) = caps.get(0) else { continue };
                if !pass.is_free(whole.start(), whole.end()) {
                    continue;
                }
                if let Some(value) = build(&caps) {
                    pass.accept(whole.start(), whole.end(), Some(value));
                }
            }
        }

        for m in BARE_YEAR.find_iter(&text) {
            let bounds = m.as_str().parse::<i32>().ok().and_then(year_bounds);
            if let Some((start, end)) = bounds {
                pass.accept(m.start(), m.end(), Some(ordered(start, end)));
            }
        }
    }

    fn orgs(&self, pass: &mut Pass) {
        let text = pass.folded.text.clone();

        for caps in ORG_CODE.captures_iter(&text) {
            if let (Some(whole), Some(code)) = (caps.get(0), caps.name("code")) {
                let value = org_value(code.as_str());
                pass.accept(whole.start(), whole.end(), Some(value));
            }
        }

        for (name, body) in &self.body_names {
            let mut from = 0;
            while let Some(offset) = text[from..].find(name.as_str()) {
                let start = from + offset;
                let end = start + name.len();
                from = end;
                if bounded_by_non_word(&text, start, end) {
                    pass.accept(start, end, Some(body_value(body)));
                }
            }
        }

        let original = pass.original;
        for m in ORG_ACRONYM.find_iter(original) {
            let body = FEDERAL_BODIES.iter().find(|b| b.acronym == Some(m.as_str()));
            if let Some(body) = body {
                let span = Span::new(m.start(), m.end());
                if pass.claims.claim(span) {
                    pass.out.push(ExtractedEntity::new(body_value(body), Some(span)));
                }
            }
        }
    }
}

fn body_value(body: &FederalBody) -> EntityValue {
    EntityValue::Org {
        code: body.siafi_code.to_string(),
        name: Some(body.name.to_string()),
    }
}

fn org_value(code: &str) -> EntityValue {
    let name = FEDERAL_BODIES
        .iter()
        .find(|b| b.siafi_code == code)
        .map(|b| b.name.to_string());
    EntityValue::Org {
        code: code.to_string(),
        name,
    }
}

// ============================================================================
// STRUCTURED FILTERS
// ============================================================================

/// Normalize structured filters through the same tables as free text.
///
/// Invalid values are dropped. A lone `date_from` runs to today; a lone
/// `date_to` starts on January 1st of its year.
pub fn entities_from_filters(filters: &QueryFilters) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();

    for cnpj in &filters.cnpjs {
        let digits = digits_of(cnpj);
        if is_valid_cnpj(&digits) {
            out.push(ExtractedEntity::new(
                EntityValue::Document {
                    kind: DocumentKind::Cnpj,
                    digits,
                },
                None,
            ));
        } else {
            debug!(cnpj = %cnpj, "Ignoring invalid CNPJ filter");
        }
    }

    if let Some(amount) = filters.min_value.filter(|v| v.is_finite() && *v >= 0.0) {
        out.push(ExtractedEntity::new(EntityValue::Money { amount }, None));
    }

    if let Some(region) = filters.region.as_deref().and_then(gazetteer::resolve_region) {
        out.push(ExtractedEntity::new(region.to_entity_value(), None));
    }

    let range = match (filters.date_from, filters.date_to) {
        (Some(from), Some(to)) => Some(ordered(from, to)),
        (Some(from), None) => Some(ordered(from, Utc::now().date_naive())),
        (None, Some(to)) => {
            NaiveDate::from_ymd_opt(to.year(), 1, 1).map(|start| ordered(start, to))
        }
        (None, None) => None,
    };
    if let Some(range) = range {
        out.push(ExtractedEntity::new(range, None));
    }

    for code in &filters.org_codes {
        let digits = digits_of(code);
        if !digits.is_empty() {
            out.push(ExtractedEntity::new(org_value(&digits), None));
        }
    }

    out
}

/// Merge filter entities over text entities; filters replace text values of the same kind.
pub fn merge_entities(
    text_entities: Vec<ExtractedEntity>,
    filter_entities: Vec<ExtractedEntity>,
) -> Vec<ExtractedEntity> {
    let overridden: BTreeSet<EntityKind> = filter_entities.iter().map(|e| e.kind).collect();
    text_entities
        .into_iter()
        .filter(|e| !overridden.contains(&e.kind))
        .chain(filter_entities)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<ExtractedEntity> {
        EntityExtractor::new().extract(text)
    }

    fn values_of(entities: &[ExtractedEntity], kind: EntityKind) -> Vec<EntityValue> {
        entities
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value.clone())
            .collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_check_digits() {
        assert!(is_valid_cnpj("11222333000181"));
        assert!(is_valid_cnpj("00000000000191"));
        assert!(!is_valid_cnpj("11222333000182"));
        assert!(!is_valid_cnpj("11111111111111"));
        assert!(is_valid_cpf("52998224725"));
        assert!(is_valid_cpf("11144477735"));
        assert!(!is_valid_cpf("52998224726"));
        assert!(!is_valid_cpf("00000000000"));
    }

    #[test]
    fn test_cnpj_formatting_variants() {
        let a = extract("contratos do fornecedor 11.222.333/0001-81");
        let b = extract("contratos do fornecedor 11222333000181");
        let expected = EntityValue::Document {
            kind: DocumentKind::Cnpj,
            digits: "11222333000181".into(),
        };
        assert_eq!(values_of(&a, EntityKind::DocumentId), vec![expected.clone()]);
        assert_eq!(values_of(&b, EntityKind::DocumentId), vec![expected]);
    }

    #[test]
    fn test_invalid_document_is_omitted() {
        let entities = extract("fornecedor 11.222.333/0001-99 em 2023");
        assert!(values_of(&entities, EntityKind::DocumentId).is_empty());
        // The year still parses; the document digits are not reread as money
        assert_eq!(values_of(&entities, EntityKind::DateRange).len(), 1);
        assert!(values_of(&entities, EntityKind::Money).is_empty());
    }

    #[test]
    fn test_money_with_units() {
        let entities = extract("contratos acima de R$ 1 milhão");
        assert_eq!(
            values_of(&entities, EntityKind::Money),
            vec![EntityValue::Money { amount: 1_000_000.0 }]
        );

        let entities = extract("gastos de R$ 500 mil com diárias");
        assert_eq!(
            values_of(&entities, EntityKind::Money),
            vec![EntityValue::Money { amount: 500_000.0 }]
        );

        let entities = extract("empenhos de 2,5 bilhões de reais");
        assert_eq!(
            values_of(&entities, EntityKind::Money),
            vec![EntityValue::Money { amount: 2_500_000_000.0 }]
        );
    }

    #[test]
    fn test_money_span_points_at_original_text() {
        let text = "acima de R$ 1 milhão";
        let entities = extract(text);
        let span = entities[0].span.unwrap();
        assert_eq!(&text[span.start..span.end], "R$ 1 milhão");
    }

    #[test]
    fn test_region_forms_resolve_identically() {
        let full = extract("gastos em Minas Gerais");
        let abbr = extract("gastos em MG");
        let code = extract("gastos no ibge 31");
        let expected = values_of(&full, EntityKind::Region);
        assert_eq!(expected.len(), 1);
        assert_eq!(values_of(&abbr, EntityKind::Region), expected);
        assert_eq!(values_of(&code, EntityKind::Region), expected);
    }

    #[test]
    fn test_longest_region_name_wins() {
        let entities = extract("contratos no Mato Grosso do Sul");
        let regions = values_of(&entities, EntityKind::Region);
        assert_eq!(regions.len(), 1);
        match &regions[0] {
            EntityValue::Region { uf, .. } => assert_eq!(uf, "MS"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_para_requires_accent() {
        assert!(values_of(&extract("contratos para escolas"), EntityKind::Region).is_empty());
        assert_eq!(values_of(&extract("contratos no Pará"), EntityKind::Region).len(), 1);
    }

    #[test]
    fn test_explicit_range_beats_bare_years() {
        let entities = extract("despesas de 2019 a 2021");
        assert_eq!(
            values_of(&entities, EntityKind::DateRange),
            vec![EntityValue::DateRange {
                start: date(2019, 1, 1),
                end: date(2021, 12, 31)
            }]
        );

        let entities = extract("contratos entre 01/02/2023 e 15/03/2023");
        assert_eq!(
            values_of(&entities, EntityKind::DateRange),
            vec![EntityValue::DateRange {
                start: date(2023, 2, 1),
                end: date(2023, 3, 15)
            }]
        );
    }

    #[test]
    fn test_month_forms() {
        let entities = extract("licitações de março de 2024");
        assert_eq!(
            values_of(&entities, EntityKind::DateRange),
            vec![EntityValue::DateRange {
                start: date(2024, 3, 1),
                end: date(2024, 3, 31)
            }]
        );

        let entities = extract("gastos de janeiro a fevereiro de 2024");
        assert_eq!(
            values_of(&entities, EntityKind::DateRange),
            vec![EntityValue::DateRange {
                start: date(2024, 1, 1),
                end: date(2024, 2, 29)
            }]
        );
    }

    #[test]
    fn test_org_extraction() {
        let entities = extract("contratos do Ministério da Saúde");
        assert_eq!(
            values_of(&entities, EntityKind::Org),
            vec![EntityValue::Org {
                code: "36000".into(),
                name: Some("Ministério da Saúde".into())
            }]
        );

        let entities = extract("despesas do órgão 26000 e do DNIT");
        let codes: Vec<String> = values_of(&entities, EntityKind::Org)
            .into_iter()
            .filter_map(|v| match v {
                EntityValue::Org { code, .. } => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec!["26000".to_string(), "39252".to_string()]);
    }

    #[test]
    fn test_unmatched_text_yields_nothing() {
        assert!(extract("olá, tudo bem?").is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn test_filters_win_over_text() {
        let text = extract("gastos em Minas Gerais em 2023");
        let filters = QueryFilters {
            region: Some("SP".into()),
            ..Default::default()
        };
        let merged = merge_entities(text, entities_from_filters(&filters));
        let regions = values_of(&merged, EntityKind::Region);
        assert_eq!(regions.len(), 1);
        match &regions[0] {
            EntityValue::Region { uf, .. } => assert_eq!(uf, "SP"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(values_of(&merged, EntityKind::DateRange).len(), 1);
    }

    #[test]
    fn test_filter_normalization() {
        let filters = QueryFilters {
            cnpjs: vec!["11.222.333/0001-81".into(), "bogus".into()],
            date_to: Some(date(2022, 6, 30)),
            ..Default::default()
        };
        let entities = entities_from_filters(&filters);
        assert_eq!(values_of(&entities, EntityKind::DocumentId).len(), 1);
        assert_eq!(
            values_of(&entities, EntityKind::DateRange),
            vec![EntityValue::DateRange {
                start: date(2022, 1, 1),
                end: date(2022, 6, 30)
            }]
        );
    }
}
