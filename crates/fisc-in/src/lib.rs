//! Fisc-In: from free-text query to intent and entities
//!
//! ```text
//! "contratos suspeitos do Ministério da Saúde em MG acima de R$ 1 milhão"
//!     ↓ normalize
//! "contratos suspeitos do ministerio da saude em mg acima de r$ 1 milhao"
//!     ↓ classify                         ↓ extract (original text)
//! anomaly_detection (0.90)               org 36000, region MG, money 1e6
//! ```
//!
//! Neither step can fail: unknown text yields the default intent and an
//! empty entity list.

pub mod entities;
pub mod gazetteer;
pub mod grammar;
pub mod matcher;
pub mod normalizer;

pub use entities::{entities_from_filters, merge_entities, EntityExtractor};
pub use grammar::{CompiledGrammar, GrammarError};
pub use matcher::{IntentClassifier, IntentModel, ModelError, PatternClassifier, PatternMatch};

use fisc_core::{ExtractedEntity, Intent, Query};
use serde::Serialize;
use tracing::info;

/// Everything the planner needs to know about a query
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub normalized: String,
    pub intent: Intent,
    pub entities: Vec<ExtractedEntity>,
}

/// Intent classification plus entity extraction for one query
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    classifier: IntentClassifier,
    extractor: EntityExtractor,
}

impl QueryAnalyzer {
    pub fn new(classifier: IntentClassifier) -> Self {
        Self {
            classifier,
            extractor: EntityExtractor::new(),
        }
    }

    /// Analyzer over the built-in grammar, without a learned model
    pub fn builtin() -> Result<Self, GrammarError> {
        Ok(Self::new(IntentClassifier::new(PatternClassifier::builtin()?)))
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Classify the query and extract its entities; structured filters override text
    pub async fn analyze(&self, query: &Query) -> QueryAnalysis {
        let intent = self.classifier.classify(&query.text).await;
        let from_text = self.extractor.extract(&query.text);
        let entities = merge_entities(from_text, entities_from_filters(&query.filters));

        info!(
            intent = %intent.kind,
            confidence = intent.confidence,
            entities = entities.len(),
            "Query analyzed"
        );

        QueryAnalysis {
            normalized: normalizer::normalize(&query.text),
            intent,
            entities,
        }
    }
}
