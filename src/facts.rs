//! Facts extracted from one exception occurrence.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single fact value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FactValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl FactValue {
    /// Truthiness used by template conditions: booleans as-is, non-empty
    /// strings and lists, numbers greater than zero. Null is never truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            FactValue::Null => false,
            FactValue::Bool(b) => *b,
            FactValue::Int(n) => *n > 0,
            FactValue::Float(f) => *f > 0.0,
            FactValue::Str(s) => !s.is_empty(),
            FactValue::List(items) => !items.is_empty(),
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FactValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FactValue::Int(n) => Some(*n as f64),
            FactValue::Float(f) => Some(*f),
            FactValue::Str(s) => s.trim().parse().ok(),
            FactValue::Null | FactValue::List(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FactValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> &[String] {
        match self {
            FactValue::List(items) => items,
            _ => &[],
        }
    }
}

// Rendering follows the conventions of the runtimes whose errors packs
// describe, so `{closest_variable}` reads `None` rather than vanishing.
impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Null => write!(f, "None"),
            FactValue::Bool(true) => write!(f, "True"),
            FactValue::Bool(false) => write!(f, "False"),
            FactValue::Int(n) => write!(f, "{n}"),
            FactValue::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            FactValue::Float(x) => write!(f, "{x}"),
            FactValue::Str(s) => write!(f, "{s}"),
            FactValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{item}'")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        FactValue::Int(value)
    }
}

impl From<u32> for FactValue {
    fn from(value: u32) -> Self {
        FactValue::Int(i64::from(value))
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        FactValue::Float(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Str(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Str(value)
    }
}

impl From<Vec<String>> for FactValue {
    fn from(value: Vec<String>) -> Self {
        FactValue::List(value)
    }
}

impl<T: Into<FactValue>> From<Option<T>> for FactValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FactValue::Null)
    }
}

/// Flat mapping from fact name to value, built fresh for every explanation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FactSet {
    facts: BTreeMap<String, FactValue>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FactValue>) {
        self.facts.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.facts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    /// Boolean fact; missing or non-boolean facts read as false
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(FactValue::Bool(true)))
    }

    /// String fact; missing or non-string facts read as empty
    pub fn text(&self, name: &str) -> &str {
        self.get(name).and_then(FactValue::as_str).unwrap_or("")
    }

    /// Numeric fact; missing or non-numeric facts read as zero
    pub fn number(&self, name: &str) -> f64 {
        self.get(name).and_then(FactValue::as_f64).unwrap_or(0.0)
    }

    /// List fact; missing or non-list facts read as empty
    pub fn list(&self, name: &str) -> &[String] {
        self.get(name).map(FactValue::as_list).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FactValue)> {
        self.facts.iter().map(|(k, v)| (k.as_str(), v))
    }
}
