//! Runtime dependency binding
//!
//! Values a stage `provides` are harvested from its usable payloads. Calls in
//! later stages that `depends_on` those keys are expanded into one call per
//! combination of harvested values, capped at `max_fanout`.

use fisc_core::payload::{field, records};
use fisc_core::{param_keys, SourceAdapterResult, SourceCall, Stage};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Keyed values harvested from completed stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutputs {
    values: BTreeMap<String, Vec<Value>>,
}

impl StageOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, keeping first-seen order and dropping duplicates
    pub fn record(&mut self, key: &str, value: Value) {
        let values = self.values.entry(key.to_string()).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Collect `provides` keys from a usable result's payload records
    pub fn harvest(&mut self, result: &SourceAdapterResult, provides: &[String]) {
        if !result.status.is_usable() {
            return;
        }
        let Some(payload) = &result.payload else { return };
        for record in records(payload) {
            for key in provides {
                if let Some(value) = lookup(record, key).and_then(|v| normalize(key, v)) {
                    self.record(key, value);
                }
            }
        }
    }

    pub fn values(&self, key: &str) -> &[Value] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Field by name (see [`field`]), or one level down in a nested object
fn lookup<'v>(record: &'v Value, key: &str) -> Option<&'v Value> {
    field(record, key).or_else(|| {
        record
            .as_object()?
            .values()
            .filter_map(Value::as_object)
            .find_map(|nested| nested.get(key))
    })
}

fn normalize(key: &str, value: &Value) -> Option<Value> {
    let is_document = key == param_keys::CNPJ || key == param_keys::CPF;
    match value {
        Value::String(s) if is_document => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            (!digits.is_empty()).then(|| Value::String(digits))
        }
        Value::Number(n) if is_document => Some(Value::String(n.to_string())),
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
        }
        Value::Number(_) | Value::Bool(_) => Some(value.clone()),
        _ => None,
    }
}

/// A stage after binding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundStage {
    pub calls: Vec<SourceCall>,
    /// Calls that could not be bound, with the reason
    pub unresolved: Vec<(SourceCall, String)>,
}

/// Expand dependent calls with harvested values
pub fn bind_stage(stage: &Stage, outputs: &StageOutputs, max_fanout: usize) -> BoundStage {
    let mut bound = BoundStage::default();

    for call in &stage.calls {
        if call.depends_on.is_empty() {
            bound.calls.push(call.clone());
            continue;
        }

        if let Some(missing) = call.depends_on.iter().find(|k| outputs.values(k).is_empty()) {
            let reason = format!("unresolved dependency `{}`", missing);
            debug!(call_id = %call.call_id, %reason, "Call not bound");
            bound.unresolved.push((call.clone(), reason));
            continue;
        }

        let combos = combinations(&call.depends_on, outputs, max_fanout.max(1));
        let fan_out = combos.len() > 1;
        for (n, combo) in combos.into_iter().enumerate() {
            let mut expanded = call.clone();
            for (key, value) in combo {
                expanded.params.insert(key, value);
            }
            if fan_out {
                expanded.call_id = format!("{}#{}", call.call_id, n + 1);
            }
            bound.calls.push(expanded);
        }
    }

    bound
}

/// Cartesian product of key values in key order, first `limit` combinations
fn combinations(
    keys: &[String],
    outputs: &StageOutputs,
    limit: usize,
) -> Vec<Vec<(String, Value)>> {
    let mut combos: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for key in keys {
        let mut next = Vec::new();
        'outer: for prefix in &combos {
            for value in outputs.values(key) {
                let mut combo = prefix.clone();
                combo.push((key.clone(), value.clone()));
                next.push(combo);
                if next.len() >= limit {
                    break 'outer;
                }
            }
        }
        combos = next;
    }
    combos
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisc_core::CallParams;
    use serde_json::json;
    use std::time::Duration;

    fn result(payload: Value) -> SourceAdapterResult {
        let call = SourceCall::new("receita", CallParams::new());
        SourceAdapterResult::success(&call, payload, Duration::from_millis(5))
    }

    fn dependent_stage() -> Stage {
        Stage {
            index: 1,
            calls: vec![
                SourceCall::new("ceis", CallParams::new()).with_depends_on(vec!["cnpj".into()]),
                SourceCall::new("ibge", CallParams::new()),
            ],
            deadline: Duration::from_secs(5),
            required: false,
        }
    }

    #[test]
    fn test_harvest_from_envelope_and_nested_fields() {
        let mut outputs = StageOutputs::new();
        outputs.harvest(
            &result(json!({
                "data": [
                    { "fornecedor": { "cnpj": "11.222.333/0001-81" } },
                    { "CNPJ": "00000000000191" },
                    { "cnpj": "11222333000181" }
                ]
            })),
            &["cnpj".to_string()],
        );
        assert_eq!(
            outputs.values("cnpj"),
            &[json!("11222333000181"), json!("00000000000191")]
        );
    }

    #[test]
    fn test_failed_results_are_not_harvested() {
        let call = SourceCall::new("receita", CallParams::new());
        let failed = SourceAdapterResult::failure(
            &call,
            fisc_core::SourceStatus::TransientError,
            "timed out",
        );
        let mut outputs = StageOutputs::new();
        outputs.harvest(&failed, &["cnpj".to_string()]);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_bind_fans_out_up_to_limit() {
        let mut outputs = StageOutputs::new();
        for cnpj in ["1", "2", "3"] {
            outputs.record("cnpj", json!(cnpj));
        }
        let bound = bind_stage(&dependent_stage(), &outputs, 2);
        let ids: Vec<&str> = bound.calls.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, vec!["ceis#1", "ceis#2", "ibge"]);
        assert_eq!(bound.calls[1].params.get("cnpj"), Some(&json!("2")));
        assert!(bound.unresolved.is_empty());
    }

    #[test]
    fn test_single_value_keeps_call_id() {
        let mut outputs = StageOutputs::new();
        outputs.record("cnpj", json!("11222333000181"));
        let bound = bind_stage(&dependent_stage(), &outputs, 5);
        assert_eq!(bound.calls[0].call_id, "ceis");
    }

    #[test]
    fn test_missing_dependency_is_unresolved() {
        let bound = bind_stage(&dependent_stage(), &StageOutputs::new(), 5);
        assert_eq!(bound.calls.len(), 1);
        assert_eq!(bound.unresolved.len(), 1);
        assert_eq!(bound.unresolved[0].1, "unresolved dependency `cnpj`");
    }
}
