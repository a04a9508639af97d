//! Capability Matrix: which data domains answer which intent
use fisc_core::IntentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod domains {
    pub const CONTRACTS: &str = "contracts";
    pub const BIDS: &str = "bids";
    pub const SUPPLIERS: &str = "suppliers";
    pub const SANCTIONS: &str = "sanctions";
    pub const EXPENSES: &str = "expenses";
    pub const TRANSFERS: &str = "transfers";
    pub const DEMOGRAPHICS: &str = "demographics";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMatrix {
    pub by_intent: BTreeMap<IntentKind, Vec<String>>,
}

impl Default for CapabilityMatrix {
    fn default() -> Self {
        use domains::*;
        let entries: [(IntentKind, &[&str]); 8] = [
            (IntentKind::ContractAnalysis, &[CONTRACTS, BIDS]),
            (IntentKind::SupplierInvestigation, &[SUPPLIERS, CONTRACTS, SANCTIONS]),
            (IntentKind::SpendingAnalysis, &[EXPENSES, TRANSFERS]),
            (IntentKind::RegionalComparison, &[DEMOGRAPHICS, TRANSFERS, EXPENSES]),
            (IntentKind::InequalityAnalysis, &[DEMOGRAPHICS, TRANSFERS]),
            (IntentKind::TemporalAnalysis, &[CONTRACTS, EXPENSES]),
            (IntentKind::AnomalyDetection, &[CONTRACTS, EXPENSES, SUPPLIERS]),
            (IntentKind::GeneralQuery, &[CONTRACTS]),
        ];
        Self {
            by_intent: entries
                .iter()
                .map(|(k, caps)| (*k, caps.iter().map(|c| c.to_string()).collect()))
                .collect(),
        }
    }
}

impl CapabilityMatrix {
    /// Replace the domains an intent needs
    pub fn with(mut self, intent: IntentKind, capabilities: &[&str]) -> Self {
        self.by_intent
            .insert(intent, capabilities.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn capabilities_for(&self, intent: IntentKind) -> &[String] {
        self.by_intent.get(&intent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn serves(&self, intent: IntentKind, source_capabilities: &[String]) -> bool {
        self.capabilities_for(intent)
            .iter()
            .any(|c| source_capabilities.contains(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_intent_has_capabilities() {
        let matrix = CapabilityMatrix::default();
        for kind in IntentKind::ALL {
            assert!(!matrix.capabilities_for(kind).is_empty(), "{kind}");
        }
    }

    #[test]
    fn test_serves() {
        let matrix = CapabilityMatrix::default();
        let caps = vec!["sanctions".to_string()];
        assert!(matrix.serves(IntentKind::SupplierInvestigation, &caps));
        assert!(!matrix.serves(IntentKind::SpendingAnalysis, &caps));
    }

    #[test]
    fn test_override() {
        let matrix = CapabilityMatrix::default().with(IntentKind::GeneralQuery, &["expenses"]);
        assert_eq!(matrix.capabilities_for(IntentKind::GeneralQuery), ["expenses".to_string()]);
    }
}
