//! Record lists inside source payloads

use serde_json::Value;

/// Envelope fields under which sources commonly nest their record lists
pub const ENVELOPES: [&str; 6] = ["data", "items", "results", "records", "registros", "resultado"];

/// Records in a payload: a list, a list under a known envelope, or one object
pub fn records(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => ENVELOPES
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array))
            .map(|items| items.iter().collect())
            .unwrap_or_else(|| vec![payload]),
        _ => Vec::new(),
    }
}

/// Field by exact name, then case-insensitive name. Dotted paths walk nested
/// objects (`fornecedor.cnpj`).
pub fn field<'v>(record: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = record;
    for part in path.split('.') {
        let map = current.as_object()?;
        current = match map.get(part) {
            Some(v) => v,
            None => map.iter().find(|(k, _)| k.eq_ignore_ascii_case(part))?.1,
        };
    }
    (!current.is_null()).then_some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_from_envelopes() {
        assert_eq!(records(&json!([1, 2])).len(), 2);
        assert_eq!(records(&json!({"registros": [{}, {}, {}]})).len(), 3);
        assert_eq!(records(&json!({"numero": "1"})).len(), 1);
        assert!(records(&json!("texto")).is_empty());
    }

    #[test]
    fn test_dotted_and_case_insensitive_fields() {
        let record = json!({"Fornecedor": {"CNPJ": "1"}, "valor": null});
        assert_eq!(field(&record, "fornecedor.cnpj"), Some(&json!("1")));
        assert_eq!(field(&record, "valor"), None);
        assert_eq!(field(&record, "orgao.codigo"), None);
    }
}
