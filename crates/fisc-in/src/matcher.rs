//! Intent classification.
//!
//! [`PatternClassifier`] matches normalized text against the compiled grammar,
//! first matching rule wins. [`IntentClassifier`] puts an optional learned
//! [`IntentModel`] in front of it; whenever the model is missing, fails, times
//! out or is unsure, the pattern result is used instead. Classification always
//! yields an [`Intent`].

use async_trait::async_trait;
use fisc_core::{Intent, IntentSource};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::grammar::{CompiledGrammar, CompiledRule, GrammarError};
use crate::normalizer;

/// Bonus per additional pattern of the winning rule that also matches
const CORROBORATION_BONUS: f64 = 0.05;
const MAX_PATTERN_CONFIDENCE: f64 = 0.99;

/// A successful grammar match
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub rule: String,
    pub intent: Intent,
    /// First pattern of the rule that matched
    pub matched_pattern: String,
    /// Slot captures from the matched pattern
    pub slots: BTreeMap<String, String>,
}

/// Deterministic keyword/pattern classifier
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    grammar: CompiledGrammar,
}

impl PatternClassifier {
    pub fn new(grammar: CompiledGrammar) -> Self {
        Self { grammar }
    }

    /// Classifier over the grammar shipped with the engine
    pub fn builtin() -> Result<Self, GrammarError> {
        Ok(Self::new(CompiledGrammar::builtin()?))
    }

    pub fn grammar(&self) -> &CompiledGrammar {
        &self.grammar
    }

    /// Match already-normalized text; `None` when no rule applies
    pub fn match_text(&self, normalized: &str) -> Option<PatternMatch> {
        self.grammar
            .rules
            .iter()
            .find_map(|rule| try_match_rule(normalized, rule))
    }

    /// Classify raw text. Never fails.
    pub fn classify(&self, text: &str) -> Intent {
        if normalizer::is_too_vague(text) {
            return self.default_intent();
        }
        let normalized = normalizer::normalize(text);
        match self.match_text(&normalized) {
            Some(m) => m.intent,
            None => self.default_intent(),
        }
    }

    pub fn default_intent(&self) -> Intent {
        Intent::new(
            self.grammar.default_intent,
            self.grammar.default_confidence,
            IntentSource::Default,
        )
    }
}

fn try_match_rule(text: &str, rule: &CompiledRule) -> Option<PatternMatch> {
    let mut matching = rule.patterns.iter().filter(|p| p.regex.is_match(text));
    let first = matching.next()?;
    let corroborating = matching.count();

    let mut slots = BTreeMap::new();
    if let Some(caps) = first.regex.captures(text) {
        for name in &first.slot_names {
            if let Some(m) = caps.name(name) {
                slots.insert(name.clone(), m.as_str().trim().to_string());
            }
        }
    }

    let confidence = (rule.confidence + CORROBORATION_BONUS * corroborating as f64)
        .min(MAX_PATTERN_CONFIDENCE);

    Some(PatternMatch {
        rule: rule.name.clone(),
        intent: Intent::new(rule.intent, confidence, IntentSource::Pattern).with_rule(&rule.name),
        matched_pattern: first.original.clone(),
        slots,
    })
}

// ============================================================================
// LEARNED MODEL
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("model returned an invalid answer: {0}")]
    Invalid(String),
}

/// A learned or LLM-backed classifier
#[async_trait]
pub trait IntentModel: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<Intent, ModelError>;
}

/// Classifier with an optional model and a deterministic fallback
#[derive(Clone)]
pub struct IntentClassifier {
    patterns: PatternClassifier,
    model: Option<Arc<dyn IntentModel>>,
    /// Model answers below this confidence defer to the patterns
    min_model_confidence: f64,
    model_timeout: Duration,
}

impl IntentClassifier {
    pub fn new(patterns: PatternClassifier) -> Self {
        Self {
            patterns,
            model: None,
            min_model_confidence: 0.6,
            model_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn IntentModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_min_model_confidence(mut self, confidence: f64) -> Self {
        self.min_model_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn patterns(&self) -> &PatternClassifier {
        &self.patterns
    }

    /// Classify a query. Never fails; falls back to the pattern grammar.
    pub async fn classify(&self, text: &str) -> Intent {
        if let Some(model) = &self.model {
            match tokio::time::timeout(self.model_timeout, model.classify(text)).await {
                Ok(Ok(intent)) if intent.confidence >= self.min_model_confidence => {
                    debug!(model = model.name(), intent = %intent.kind, "Model classification");
                    return Intent {
                        source: IntentSource::Model,
                        ..intent
                    };
                }
                Ok(Ok(intent)) => {
                    debug!(
                        model = model.name(),
                        confidence = intent.confidence,
                        "Model unsure, using patterns"
                    );
                }
                Ok(Err(e)) => {
                    warn!(model = model.name(), error = %e, "Model failed, using patterns")
                }
                Err(_) => warn!(model = model.name(), "Model timed out, using patterns"),
            }
        }
        self.patterns.classify(text)
    }
}

impl std::fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("min_model_confidence", &self.min_model_confidence)
            .finish()
    }
}
