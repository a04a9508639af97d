//! Intent grammar loading and compilation.
//!
//! Grammar files are YAML with an ordered rule list:
//!
//! ```yaml
//! version: "1.0"
//! default:
//!   intent: general_query
//!   confidence: 0.3
//! rules:
//!   - name: supplier_by_document
//!     intent: supplier_investigation
//!     confidence: 0.9
//!     patterns:
//!       - "fornecedor {supplier}"
//! ```
//!
//! Patterns are matched against normalized text (lowercase, no accents).
//! `{slot}` placeholders capture free text. Rule order is significant:
//! the matcher takes the first rule that matches.

use fisc_core::{FiscError, IntentKind};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Grammar shipped with the engine
pub const DEFAULT_GRAMMAR: &str = include_str!("../../../grammars/investigation-intents.yaml");

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrammarError {
    #[error("cannot read grammar {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("cannot parse grammar: {0}")]
    Parse(String),

    #[error("rule `{rule}` names unknown intent `{intent}`")]
    UnknownIntent { rule: String, intent: String },

    #[error("rule `{rule}` has no patterns")]
    EmptyRule { rule: String },

    #[error("rule `{rule}` pattern `{pattern}`: {reason}")]
    Pattern {
        rule: String,
        pattern: String,
        reason: String,
    },
}

impl From<GrammarError> for FiscError {
    fn from(e: GrammarError) -> Self {
        FiscError::Grammar(e.to_string())
    }
}

/// Top-level grammar file structure
#[derive(Debug, Clone, Deserialize)]
pub struct GrammarFile {
    pub version: String,
    #[serde(default)]
    pub default: DefaultIntent,
    pub rules: Vec<Rule>,
}

/// Intent returned when no rule matches
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultIntent {
    pub intent: String,
    pub confidence: f64,
}

impl Default for DefaultIntent {
    fn default() -> Self {
        Self {
            intent: IntentKind::GeneralQuery.as_str().to_string(),
            confidence: 0.3,
        }
    }
}

/// A single intent rule with multiple patterns
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub name: String,
    pub intent: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub patterns: Vec<String>,
}

fn default_confidence() -> f64 {
    0.8
}

/// Compiled grammar ready for matching
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub version: String,
    pub rules: Vec<CompiledRule>,
    pub default_intent: IntentKind,
    pub default_confidence: f64,
}

/// A compiled rule with regex patterns
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub intent: IntentKind,
    pub description: String,
    pub confidence: f64,
    pub patterns: Vec<CompiledPattern>,
}

/// A compiled pattern with extracted slot names
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub original: String,
    pub regex: Regex,
    pub slot_names: Vec<String>,
    /// Literal characters in the pattern (more = more specific)
    pub specificity: usize,
}

impl CompiledGrammar {
    /// Load and compile a grammar from a YAML file
    pub fn load(path: &str) -> Result<Self, GrammarError> {
        let content = std::fs::read_to_string(path).map_err(|e| GrammarError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// The grammar shipped with the engine
    pub fn builtin() -> Result<Self, GrammarError> {
        Self::from_yaml(DEFAULT_GRAMMAR)
    }

    /// Compile a grammar from YAML content. Every rule must compile.
    pub fn from_yaml(yaml: &str) -> Result<Self, GrammarError> {
        let file: GrammarFile =
            serde_yaml::from_str(yaml).map_err(|e| GrammarError::Parse(e.to_string()))?;

        let default_intent = IntentKind::from_name(&file.default.intent).ok_or_else(|| {
            GrammarError::UnknownIntent {
                rule: "default".to_string(),
                intent: file.default.intent.clone(),
            }
        })?;

        let mut rules = Vec::with_capacity(file.rules.len());
        for rule in file.rules {
            let intent =
                IntentKind::from_name(&rule.intent).ok_or_else(|| GrammarError::UnknownIntent {
                    rule: rule.name.clone(),
                    intent: rule.intent.clone(),
                })?;
            if rule.patterns.is_empty() {
                return Err(GrammarError::EmptyRule { rule: rule.name });
            }
            let patterns = rule
                .patterns
                .iter()
                .map(|p| {
                    compile_pattern(p).map_err(|reason| GrammarError::Pattern {
                        rule: rule.name.clone(),
                        pattern: p.clone(),
                        reason,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            rules.push(CompiledRule {
                name: rule.name,
                intent,
                description: rule.description,
                confidence: rule.confidence.clamp(0.0, 1.0),
                patterns,
            });
        }

        Ok(CompiledGrammar {
            version: file.version,
            rules,
            default_intent,
            default_confidence: file.default.confidence.clamp(0.0, 1.0),
        })
    }
}

/// Compile a pattern string with {slot} placeholders into an unanchored regex
fn compile_pattern(pattern: &str) -> Result<CompiledPattern, String> {
    let mut regex_str = String::new();
    let mut slot_names = Vec::new();
    let mut specificity = 0;
    let mut literal = String::new();

    let mut chars = pattern.trim().chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            let mut slot_name = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == '}' {
                    closed = true;
                    break;
                }
                slot_name.push(next);
            }
            if !closed || slot_name.is_empty() {
                return Err("unterminated or empty slot".to_string());
            }
            push_literal(&mut regex_str, &literal);
            literal.clear();
            let group = if chars.peek().is_none() { ".+" } else { ".+?" };
            regex_str.push_str(&format!("(?P<{}>{})", slot_name, group));
            slot_names.push(slot_name);
        } else {
            if c.is_alphanumeric() || c == ' ' {
                specificity += 1;
            }
            literal.push(c);
        }
    }
    push_literal(&mut regex_str, &literal);

    if regex_str.is_empty() {
        return Err("empty pattern".to_string());
    }

    let regex = Regex::new(&regex_str).map_err(|e| format!("invalid pattern regex: {}", e))?;

    Ok(CompiledPattern {
        original: pattern.to_string(),
        regex,
        slot_names,
        specificity,
    })
}

/// Escape a literal segment; word edges get `\b` so "gini" does not match "virginia"
fn push_literal(regex_str: &mut String, literal: &str) {
    if literal.is_empty() {
        return;
    }
    let starts_word = literal.chars().next().is_some_and(char::is_alphanumeric);
    let ends_word = literal.chars().next_back().is_some_and(char::is_alphanumeric);
    if starts_word && regex_str.is_empty() {
        regex_str.push_str(r"\b");
    }
    regex_str.push_str(&regex::escape(literal));
    if ends_word {
        regex_str.push_str(r"\b");
    }
}
