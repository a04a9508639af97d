//! Flattened contract facts the detectors work on

use chrono::NaiveDate;
use fisc_graph::{Edge, EntityGraph, NodeId, NodeKind, Relation};

#[derive(Debug, Clone, PartialEq)]
pub struct ContractFacts {
    pub id: NodeId,
    pub label: String,
    pub value: Option<f64>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    /// Category, else modality
    pub category: Option<String>,
    pub supplier: Option<NodeId>,
    pub supplier_label: Option<String>,
    pub agency: Option<NodeId>,
    pub agency_label: Option<String>,
}

impl ContractFacts {
    /// Contract nodes of `graph`, ordered by node id
    pub fn collect(graph: &EntityGraph) -> Vec<ContractFacts> {
        graph
            .contracts()
            .into_iter()
            .map(|view| ContractFacts {
                id: view.id().clone(),
                label: view.node.label().to_string(),
                value: view.value().filter(|v| v.is_finite()),
                date: view.date(),
                description: view.description().map(str::to_string),
                category: view.category().or(view.modality()).map(str::to_string),
                supplier: view.supplier.map(|n| n.id.clone()),
                supplier_label: view.supplier.map(|n| n.label().to_string()),
                agency: view.agency.map(|n| n.id.clone()),
                agency_label: view.agency.map(|n| n.label().to_string()),
            })
            .collect()
    }

    pub fn value_edge(&self) -> Option<String> {
        let value = self.value?;
        let to = NodeId::new(NodeKind::MonetaryValue, &fisc_graph::canonical::amount_key(value));
        Some(Edge::edge_id(&self.id, Relation::ValuedAt, &to))
    }

    pub fn supplier_edge(&self) -> Option<String> {
        let to = self.supplier.as_ref()?;
        Some(Edge::edge_id(&self.id, Relation::AwardedTo, to))
    }

    pub fn agency_edge(&self) -> Option<String> {
        let to = self.agency.as_ref()?;
        Some(Edge::edge_id(&self.id, Relation::IssuedBy, to))
    }

    pub fn date_node(&self) -> Option<NodeId> {
        let date = self.date?;
        Some(NodeId::new(NodeKind::Date, &date.format("%Y-%m-%d").to_string()))
    }
}

/// `R$ 1.234.567,89`
pub(crate) fn format_brl(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}R$ {},{:02}", sign, grouped, cents % 100)
}
