//! EntityGraphBuilder: fold source results into one graph

use crate::canonical::amount_key;
use crate::graph::{fields, EntityGraph, NodeId, NodeKind, Relation, Stamp};
use crate::mapping::{map_record, ContractRecord, MappedRecord, PartyRecord};
use fisc_core::payload::records;
use fisc_core::SourceAdapterResult;
use serde::Serialize;
use serde_json::Value;
use std::ops::AddAssign;
use tracing::debug;

/// What one merge contributed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub results: usize,
    pub records: usize,
    /// Records that mapped onto at least one entity
    pub mapped: usize,
    /// Results already merged, skipped by digest
    pub duplicates: usize,
    /// Results without a usable payload
    pub skipped: usize,
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.results += other.results;
        self.records += other.records;
        self.mapped += other.mapped;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityGraphBuilder {
    graph: EntityGraph,
}

impl EntityGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue merging into an existing graph
    pub fn from_graph(graph: EntityGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn into_graph(self) -> EntityGraph {
        self.graph
    }

    /// Fold every usable result, in any order
    pub fn merge_all<'r>(
        &mut self,
        results: impl IntoIterator<Item = &'r SourceAdapterResult>,
    ) -> MergeStats {
        let mut stats = MergeStats::default();
        for result in results {
            stats += self.merge(result);
        }
        stats
    }

    /// Fold one result. Failed results and repeats of an already merged
    /// result leave the graph untouched.
    pub fn merge(&mut self, result: &SourceAdapterResult) -> MergeStats {
        let mut stats = MergeStats {
            results: 1,
            ..MergeStats::default()
        };
        let payload = match (&result.payload, result.status.is_usable()) {
            (Some(payload), true) => payload,
            _ => {
                stats.skipped = 1;
                return stats;
            }
        };

        let digest = result.digest();
        if self.graph.has_merged(&digest) {
            stats.duplicates = 1;
            return stats;
        }

        let stamp = Stamp {
            fetched_at: result.fetched_at,
            source_id: result.source_id.clone(),
            digest: digest.clone(),
        };
        for record in records(payload) {
            stats.records += 1;
            let mapped = map_record(record);
            if !mapped.is_empty() {
                stats.mapped += 1;
                self.merge_record(mapped, &stamp);
            }
        }
        self.graph.mark_merged(digest);

        debug!(
            source_id = %result.source_id,
            call_id = %result.call_id,
            records = stats.records,
            mapped = stats.mapped,
            nodes = self.graph.node_count(),
            "Result merged"
        );
        stats
    }

    fn merge_record(&mut self, mapped: MappedRecord, stamp: &Stamp) {
        let supplier = mapped
            .supplier
            .map(|party| self.merge_party(NodeKind::Supplier, party, stamp));
        let agency = mapped
            .agency
            .map(|party| self.merge_party(NodeKind::Agency, party, stamp));

        let source = stamp.source_id.as_str();
        match mapped.contract {
            Some(contract) => {
                let id = self.merge_contract(contract, stamp);
                if let Some(supplier) = &supplier {
                    self.graph.upsert_edge(&id, Relation::AwardedTo, supplier, source);
                    self.graph
                        .set_field(&id, fields::SUPPLIER, Value::from(supplier.as_str()), stamp);
                }
                if let Some(agency) = &agency {
                    self.graph.upsert_edge(&id, Relation::IssuedBy, agency, source);
                    self.graph
                        .set_field(&id, fields::AGENCY, Value::from(agency.as_str()), stamp);
                }
            }
            None => {
                if let (Some(supplier), Some(agency)) = (&supplier, &agency) {
                    self.graph.upsert_edge(supplier, Relation::Supplies, agency, source);
                }
            }
        }
    }

    fn merge_contract(&mut self, contract: ContractRecord, stamp: &Stamp) -> NodeId {
        let source = stamp.source_id.as_str();
        let id = self.graph.upsert_node(NodeKind::Contract, &contract.key, source);

        let text_fields = [
            (fields::NUMBER, contract.number),
            (fields::DESCRIPTION, contract.description),
            (fields::CATEGORY, contract.category),
            (fields::MODALITY, contract.modality),
        ];
        for (field, value) in text_fields {
            if let Some(value) = value {
                self.graph.set_field(&id, field, Value::from(value), stamp);
            }
        }

        if let Some(amount) = contract.value {
            self.graph.set_field(&id, fields::VALUE, Value::from(amount), stamp);
            let value_id = self
                .graph
                .upsert_node(NodeKind::MonetaryValue, &amount_key(amount), source);
            self.graph
                .set_field(&value_id, fields::AMOUNT, Value::from(amount), stamp);
            self.graph.upsert_edge(&id, Relation::ValuedAt, &value_id, source);
        }

        if let Some(date) = contract.date {
            let iso = date.format("%Y-%m-%d").to_string();
            self.graph.set_field(&id, fields::DATE, Value::from(iso.as_str()), stamp);
            let date_id = self.graph.upsert_node(NodeKind::Date, &iso, source);
            self.graph.upsert_edge(&id, Relation::SignedOn, &date_id, source);
        }
        id
    }

    fn merge_party(&mut self, kind: NodeKind, party: PartyRecord, stamp: &Stamp) -> NodeId {
        let id = self.graph.upsert_node(kind, &party.key, &stamp.source_id);
        let party_fields = [
            (fields::DOCUMENT, party.document),
            (fields::CODE, party.code),
            (fields::NAME, party.name),
            (fields::UF, party.uf),
        ];
        for (field, value) in party_fields {
            if let Some(value) = value {
                self.graph.set_field(&id, field, Value::from(value), stamp);
            }
        }
        id
    }
}
