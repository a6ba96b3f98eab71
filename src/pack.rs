//! Explanation pack model.
//!
//! A pack is a named, versioned bundle of rules. Each rule maps a set of
//! match conditions (exception type, message regexes, context predicates)
//! to templated explanation content. Packs are immutable once loaded.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::PackError;

/// Default similarity threshold for `variable_similarity` predicates
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Default minimum number of similar names for `variable_similarity` predicates
pub const DEFAULT_MIN_MATCHES: usize = 1;

/// Metadata describing a pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackMetadata {
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub version: String,
    pub description: String,
    pub author: String,
    pub license: String,
    /// Minimum engine version the pack was written against
    #[serde(alias = "qinter_version", deserialize_with = "scalar_string")]
    pub min_engine_version: String,
    /// Exception type names this pack explains
    pub targets: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Version fields written unquoted in YAML (`version: 1.0`) arrive as numbers
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Int(n) => n.to_string(),
        // Debug keeps the trailing `.0` of whole floats
        Scalar::Float(f) => format!("{f:?}"),
    })
}

/// A loaded pack: metadata plus its ordered rule list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RulePack {
    pub metadata: PackMetadata,
    #[serde(rename = "explanations")]
    pub rules: Vec<Rule>,
    /// Where the pack was loaded from, if it came from disk
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl RulePack {
    pub fn new(metadata: PackMetadata, rules: Vec<Rule>) -> Self {
        Self {
            metadata,
            rules,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether this pack declares the exception type among its targets
    pub fn targets(&self, exception_type: &str) -> bool {
        self.metadata.targets.iter().any(|t| t == exception_type)
    }

    /// Structural checks that serde cannot express: a non-empty name, at
    /// least one rule, and rule ids unique within the pack.
    pub fn validate(&self) -> Result<(), PackError> {
        let origin = self.origin();

        if self.metadata.name.trim().is_empty() {
            return Err(PackError::Invalid {
                origin,
                message: "pack name must not be empty".to_string(),
            });
        }

        if self.rules.is_empty() {
            return Err(PackError::NoRules(origin));
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(PackError::Invalid {
                    origin,
                    message: format!("duplicate explanation id '{}'", rule.id),
                });
            }
        }

        Ok(())
    }

    /// Human-readable label for error messages
    pub fn origin(&self) -> String {
        match &self.source {
            Some(path) => path.display().to_string(),
            None => format!("pack '{}'", self.metadata.name),
        }
    }
}

/// One explanation rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rule {
    pub id: String,
    pub priority: i64,
    pub conditions: MatchConditions,
    #[serde(rename = "explanation")]
    pub content: RuleContent,
}

/// When a rule applies
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchConditions {
    /// Exact, case-sensitive exception type name
    pub exception_type: String,
    /// OR-combined, case-insensitive regexes searched in the message
    pub message_patterns: Vec<String>,
    /// AND-combined predicates over the analyzed facts
    #[serde(default)]
    pub context_conditions: Vec<ContextPredicate>,
}

/// A structured condition evaluated against a [`FactSet`](crate::facts::FactSet).
///
/// Packs spell predicates as flat maps with a `type` key. Kinds this engine
/// does not know are kept as [`ContextPredicate::Unknown`] and evaluate as
/// satisfied, so packs written for newer engines still load.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawPredicate")]
pub enum ContextPredicate {
    VariableSimilarity { threshold: f64, min_matches: usize },
    ImportPattern { modules: Vec<String> },
    BuiltinTypo { functions: Vec<String> },
    FileExtension { extensions: Vec<String> },
    FunctionContext { inside_function: Option<bool> },
    Unknown { kind: String },
}

impl ContextPredicate {
    pub fn kind(&self) -> &str {
        match self {
            ContextPredicate::VariableSimilarity { .. } => "variable_similarity",
            ContextPredicate::ImportPattern { .. } => "import_pattern",
            ContextPredicate::BuiltinTypo { .. } => "builtin_typo",
            ContextPredicate::FileExtension { .. } => "file_extension",
            ContextPredicate::FunctionContext { .. } => "function_context",
            ContextPredicate::Unknown { kind } => kind,
        }
    }
}

#[derive(Deserialize)]
struct RawPredicate {
    #[serde(rename = "type")]
    kind: String,
    threshold: Option<f64>,
    min_matches: Option<usize>,
    modules: Option<Vec<String>>,
    functions: Option<Vec<String>>,
    extensions: Option<Vec<String>>,
    inside_function: Option<bool>,
}

impl From<RawPredicate> for ContextPredicate {
    fn from(raw: RawPredicate) -> Self {
        match raw.kind.as_str() {
            "variable_similarity" => ContextPredicate::VariableSimilarity {
                threshold: raw.threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
                min_matches: raw.min_matches.unwrap_or(DEFAULT_MIN_MATCHES),
            },
            "import_pattern" => ContextPredicate::ImportPattern {
                modules: raw.modules.unwrap_or_default(),
            },
            "builtin_typo" => ContextPredicate::BuiltinTypo {
                functions: raw.functions.unwrap_or_default(),
            },
            "file_extension" => ContextPredicate::FileExtension {
                extensions: raw.extensions.unwrap_or_default(),
            },
            "function_context" => ContextPredicate::FunctionContext {
                inside_function: raw.inside_function,
            },
            _ => ContextPredicate::Unknown { kind: raw.kind },
        }
    }
}

/// Templated explanation text
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleContent {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub examples: Vec<Example>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Suggestion {
    pub template: String,
    /// Display order within the rule; lower is shown first
    pub priority: i64,
    #[serde(default = "always")]
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Example {
    pub id: String,
    pub description: String,
    pub code: String,
    #[serde(default = "always")]
    pub condition: String,
}

fn always() -> String {
    "always".to_string()
}
