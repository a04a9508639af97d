//! EntityGraph: canonical nodes, provenance-carrying edges

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Field names stored on nodes
pub mod fields {
    pub const NUMBER: &str = "number";
    pub const DESCRIPTION: &str = "description";
    pub const VALUE: &str = "value";
    pub const DATE: &str = "date";
    pub const CATEGORY: &str = "category";
    pub const MODALITY: &str = "modality";
    /// Contract → supplier node id
    pub const SUPPLIER: &str = "supplier";
    /// Contract → agency node id
    pub const AGENCY: &str = "agency";
    pub const DOCUMENT: &str = "document";
    pub const CODE: &str = "code";
    pub const NAME: &str = "name";
    pub const UF: &str = "uf";
    pub const AMOUNT: &str = "amount";
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Contract,
    Supplier,
    Agency,
    MonetaryValue,
    Date,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Contract => "contract",
            NodeKind::Supplier => "supplier",
            NodeKind::Agency => "agency",
            NodeKind::MonetaryValue => "monetary_value",
            NodeKind::Date => "date",
        }
    }
}

/// `<kind>:<canonical key>`, e.g. `supplier:11222333000181`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(kind: NodeKind, key: &str) -> Self {
        Self(format!("{}:{}", kind.as_str(), key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Contract → Supplier
    AwardedTo,
    /// Contract → Agency
    IssuedBy,
    /// Contract → MonetaryValue
    ValuedAt,
    /// Contract → Date
    SignedOn,
    /// Supplier → Agency, from records without a contract
    Supplies,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::AwardedTo => "awarded_to",
            Relation::IssuedBy => "issued_by",
            Relation::ValuedAt => "valued_at",
            Relation::SignedOn => "signed_on",
            Relation::Supplies => "supplies",
        }
    }
}

// ============================================================================
// FIELDS
// ============================================================================

/// Ordering key for last-writer-wins
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub fetched_at: DateTime<Utc>,
    pub source_id: String,
    /// Digest of the result that wrote the value
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    pub stamp: Stamp,
}

impl FieldValue {
    /// Greater stamp wins; the serialized value breaks exact stamp ties
    pub(crate) fn supersedes(&self, other: &FieldValue) -> bool {
        match self.stamp.cmp(&other.stamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.value.to_string() > other.value.to_string(),
        }
    }
}

// ============================================================================
// NODES & EDGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub key: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// Distinct source ids that mentioned this node
    pub provenance: BTreeSet<String>,
}

impl Node {
    fn new(kind: NodeKind, key: &str) -> Self {
        Self {
            id: NodeId::new(kind, key),
            kind,
            key: key.to_string(),
            fields: BTreeMap::new(),
            provenance: BTreeSet::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(|f| &f.value)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.text(field).and_then(|s| s.parse().ok())
    }

    /// Display label: name, else number, else key
    pub fn label(&self) -> &str {
        self.text(fields::NAME)
            .or_else(|| self.text(fields::NUMBER))
            .unwrap_or(&self.key)
    }

    pub(crate) fn set(&mut self, field: &str, candidate: FieldValue) -> bool {
        match self.fields.get(field) {
            Some(current) if !candidate.supersedes(current) => false,
            _ => {
                self.fields.insert(field.to_string(), candidate);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// `<from>|<relation>|<to>`
    pub id: String,
    pub from: NodeId,
    pub relation: Relation,
    pub to: NodeId,
    pub provenance: BTreeSet<String>,
}

impl Edge {
    pub fn edge_id(from: &NodeId, relation: Relation, to: &NodeId) -> String {
        format!("{}|{}|{}", from, relation.as_str(), to)
    }
}

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<String, Edge>,
    /// Digests of results already folded in
    merged: BTreeSet<String>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.kind == kind)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edges_from<'a>(&'a self, from: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| &e.from == from)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_merged(&self, digest: &str) -> bool {
        self.merged.contains(digest)
    }

    pub fn results_merged(&self) -> usize {
        self.merged.len()
    }

    /// Every source id in any node's provenance
    pub fn sources(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(|n| n.provenance.iter().cloned())
            .collect()
    }

    pub(crate) fn mark_merged(&mut self, digest: String) {
        self.merged.insert(digest);
    }

    pub(crate) fn upsert_node(&mut self, kind: NodeKind, key: &str, source_id: &str) -> NodeId {
        let id = NodeId::new(kind, key);
        let node = self
            .nodes
            .entry(id.clone())
            .or_insert_with(|| Node::new(kind, key));
        node.provenance.insert(source_id.to_string());
        id
    }

    pub(crate) fn set_field(&mut self, id: &NodeId, field: &str, value: Value, stamp: &Stamp) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.set(
                field,
                FieldValue {
                    value,
                    stamp: stamp.clone(),
                },
            );
        }
    }

    pub(crate) fn upsert_edge(
        &mut self,
        from: &NodeId,
        relation: Relation,
        to: &NodeId,
        source_id: &str,
    ) {
        let id = Edge::edge_id(from, relation, to);
        let edge = self.edges.entry(id.clone()).or_insert_with(|| Edge {
            id,
            from: from.clone(),
            relation,
            to: to.clone(),
            provenance: BTreeSet::new(),
        });
        edge.provenance.insert(source_id.to_string());
    }

    /// Contract nodes resolved with their supplier and agency
    pub fn contracts(&self) -> Vec<ContractView<'_>> {
        self.nodes_of(NodeKind::Contract)
            .map(|node| ContractView {
                node,
                supplier: node
                    .text(fields::SUPPLIER)
                    .and_then(|id| self.nodes.get(&NodeId(id.to_string()))),
                agency: node
                    .text(fields::AGENCY)
                    .and_then(|id| self.nodes.get(&NodeId(id.to_string()))),
            })
            .collect()
    }

    pub fn summary(&self) -> GraphSummary {
        let mut nodes = BTreeMap::new();
        for node in self.nodes.values() {
            *nodes.entry(node.kind).or_insert(0) += 1;
        }
        GraphSummary {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            nodes_by_kind: nodes,
            sources: self.sources().into_iter().collect(),
            results_merged: self.merged.len(),
            partial: false,
        }
    }
}

/// A contract node with its resolved parties
#[derive(Debug, Clone, Copy)]
pub struct ContractView<'g> {
    pub node: &'g Node,
    pub supplier: Option<&'g Node>,
    pub agency: Option<&'g Node>,
}

impl ContractView<'_> {
    pub fn id(&self) -> &NodeId {
        &self.node.id
    }

    pub fn value(&self) -> Option<f64> {
        self.node.number(fields::VALUE)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.node.date(fields::DATE)
    }

    pub fn description(&self) -> Option<&str> {
        self.node.text(fields::DESCRIPTION)
    }

    pub fn category(&self) -> Option<&str> {
        self.node.text(fields::CATEGORY)
    }

    pub fn modality(&self) -> Option<&str> {
        self.node.text(fields::MODALITY)
    }
}

/// Counts handed to the API layer instead of the full graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub sources: Vec<String>,
    pub results_merged: usize,
    /// Built from a degraded investigation
    pub partial: bool,
}
