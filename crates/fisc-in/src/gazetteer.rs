//! Reference tables: Brazilian federative units and federal bodies.

use fisc_core::EntityValue;
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::normalizer::fold;

/// A federative unit (state or Federal District)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub uf: &'static str,
    pub ibge_code: u8,
}

impl Region {
    pub fn to_entity_value(&self) -> EntityValue {
        EntityValue::Region {
            uf: self.uf.to_string(),
            ibge_code: self.ibge_code,
            name: self.name.to_string(),
        }
    }
}

pub static REGIONS: [Region; 27] = [
    Region { name: "Rondônia", uf: "RO", ibge_code: 11 },
    Region { name: "Acre", uf: "AC", ibge_code: 12 },
    Region { name: "Amazonas", uf: "AM", ibge_code: 13 },
    Region { name: "Roraima", uf: "RR", ibge_code: 14 },
    Region { name: "Pará", uf: "PA", ibge_code: 15 },
    Region { name: "Amapá", uf: "AP", ibge_code: 16 },
    Region { name: "Tocantins", uf: "TO", ibge_code: 17 },
    Region { name: "Maranhão", uf: "MA", ibge_code: 21 },
    Region { name: "Piauí", uf: "PI", ibge_code: 22 },
    Region { name: "Ceará", uf: "CE", ibge_code: 23 },
    Region { name: "Rio Grande do Norte", uf: "RN", ibge_code: 24 },
    Region { name: "Paraíba", uf: "PB", ibge_code: 25 },
    Region { name: "Pernambuco", uf: "PE", ibge_code: 26 },
    Region { name: "Alagoas", uf: "AL", ibge_code: 27 },
    Region { name: "Sergipe", uf: "SE", ibge_code: 28 },
    Region { name: "Bahia", uf: "BA", ibge_code: 29 },
    Region { name: "Minas Gerais", uf: "MG", ibge_code: 31 },
    Region { name: "Espírito Santo", uf: "ES", ibge_code: 32 },
    Region { name: "Rio de Janeiro", uf: "RJ", ibge_code: 33 },
    Region { name: "São Paulo", uf: "SP", ibge_code: 35 },
    Region { name: "Paraná", uf: "PR", ibge_code: 41 },
    Region { name: "Santa Catarina", uf: "SC", ibge_code: 42 },
    Region { name: "Rio Grande do Sul", uf: "RS", ibge_code: 43 },
    Region { name: "Mato Grosso do Sul", uf: "MS", ibge_code: 50 },
    Region { name: "Mato Grosso", uf: "MT", ibge_code: 51 },
    Region { name: "Goiás", uf: "GO", ibge_code: 52 },
    Region { name: "Distrito Federal", uf: "DF", ibge_code: 53 },
];

/// Folded names that are also common Portuguese words; they only count
/// when written with their accents ("Pará", never "para").
pub const ACCENT_REQUIRED: [&str; 1] = ["para"];

/// A federal body with its SIAFI code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FederalBody {
    pub name: &'static str,
    pub acronym: Option<&'static str>,
    pub siafi_code: &'static str,
}

pub static FEDERAL_BODIES: [FederalBody; 8] = [
    FederalBody { name: "Ministério da Educação", acronym: Some("MEC"), siafi_code: "26000" },
    FederalBody { name: "Ministério da Saúde", acronym: None, siafi_code: "36000" },
    FederalBody { name: "Ministério da Defesa", acronym: None, siafi_code: "52000" },
    FederalBody { name: "Ministério da Fazenda", acronym: None, siafi_code: "25000" },
    FederalBody { name: "Ministério da Justiça", acronym: None, siafi_code: "30000" },
    FederalBody { name: "Ministério da Cidadania", acronym: None, siafi_code: "55000" },
    FederalBody {
        name: "Fundo Nacional de Desenvolvimento da Educação",
        acronym: Some("FNDE"),
        siafi_code: "26298",
    },
    FederalBody {
        name: "Departamento Nacional de Infraestrutura de Transportes",
        acronym: Some("DNIT"),
        siafi_code: "39252",
    },
];

lazy_static! {
    static ref BY_FOLDED_NAME: HashMap<String, &'static Region> =
        REGIONS.iter().map(|r| (fold(r.name), r)).collect();
    static ref BY_UF: HashMap<&'static str, &'static Region> =
        REGIONS.iter().map(|r| (r.uf, r)).collect();
    static ref BY_CODE: HashMap<u8, &'static Region> =
        REGIONS.iter().map(|r| (r.ibge_code, r)).collect();
}

/// Resolve a full name, UF abbreviation or IBGE code to the canonical region.
///
/// Lookup order is full name, then abbreviation, then code.
pub fn resolve_region(input: &str) -> Option<&'static Region> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let folded = fold(trimmed);
    if let Some(region) = BY_FOLDED_NAME.get(&folded) {
        return Some(*region);
    }
    let upper = trimmed.to_ascii_uppercase();
    if let Some(region) = BY_UF.get(upper.as_str()) {
        return Some(*region);
    }
    trimmed.parse::<u8>().ok().and_then(|code| BY_CODE.get(&code).copied())
}

pub fn region_by_uf(uf: &str) -> Option<&'static Region> {
    BY_UF.get(uf.to_ascii_uppercase().as_str()).copied()
}

pub fn region_by_code(code: u8) -> Option<&'static Region> {
    BY_CODE.get(&code).copied()
}

/// Folded region names, longest first, so longer names win over their prefixes
pub fn region_names_longest_first() -> Vec<(String, &'static Region)> {
    let mut names: Vec<(String, &'static Region)> =
        REGIONS.iter().map(|r| (fold(r.name), r)).collect();
    names.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_forms_resolve_to_same_key() {
        let by_name = resolve_region("Minas Gerais").unwrap();
        let by_uf = resolve_region("MG").unwrap();
        let by_code = resolve_region("31").unwrap();
        assert_eq!(by_name.uf, "MG");
        assert_eq!(by_name, by_uf);
        assert_eq!(by_uf, by_code);
    }

    #[test]
    fn test_resolution_is_accent_and_case_insensitive() {
        assert_eq!(resolve_region("sao paulo").unwrap().uf, "SP");
        assert_eq!(resolve_region("SÃO PAULO").unwrap().uf, "SP");
        assert_eq!(resolve_region("rj").unwrap().ibge_code, 33);
    }

    #[test]
    fn test_unknown_region() {
        assert!(resolve_region("Atlântida").is_none());
        assert!(resolve_region("99").is_none());
        assert!(resolve_region("").is_none());
    }

    #[test]
    fn test_longest_names_first() {
        let names = region_names_longest_first();
        let pos = |n: &str| names.iter().position(|(name, _)| name == n).unwrap();
        assert!(pos("mato grosso do sul") < pos("mato grosso"));
    }
}
