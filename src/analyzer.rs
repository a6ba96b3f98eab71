//! Context analysis: turns an exception and its captured context into a
//! [`FactSet`] that rule predicates and templates are evaluated against.
//!
//! Every extraction here is best-effort. A message that matches none of the
//! known shapes leaves the corresponding fact at its default; nothing in
//! this module fails.

use regex::Regex;
use similar::{ChangeTag, TextDiff};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::context::{ExceptionContext, MODULE_LEVEL};
use crate::facts::{FactSet, FactValue};
use crate::pack::ContextPredicate;

/// Identifier used when the message names no variable
pub const UNKNOWN_VARIABLE: &str = "unknown";

/// Filename used when the context carries no frames
pub const INTERACTIVE: &str = "interactive";

/// Maximum number of similar names reported
const MAX_SIMILAR: usize = 5;

/// Minimum similarity ratio for a name to count as similar
const SIMILARITY_CUTOFF: f64 = 0.4;

const TYPE_ERROR: &str = "TypeError";
const VALUE_ERROR: &str = "ValueError";

/// Module names that, when undefined, usually mean a missing import
const COMMON_MODULES: &[&str] = &[
    "requests",
    "pandas",
    "numpy",
    "matplotlib",
    "json",
    "os",
    "sys",
    "datetime",
    "math",
    "random",
    "time",
    "urllib",
    "sqlite3",
    "csv",
    "pickle",
    "itertools",
    "collections",
    "functools",
    "operator",
];

/// Common misspellings of builtin functions
const BUILTIN_TYPOS: &[(&str, &str)] = &[
    ("lenght", "len"),
    ("lentgh", "len"),
    ("legth", "len"),
    ("pirnt", "print"),
    ("prnit", "print"),
    ("prin", "print"),
    ("strig", "str"),
    ("strign", "str"),
    ("itn", "int"),
    ("itne", "int"),
    ("flaot", "float"),
    ("flot", "float"),
    ("lsit", "list"),
    ("listst", "list"),
    ("dcit", "dict"),
    ("dictionairy", "dict"),
];

/// An extractor tries one message shape and yields a value when it fits
struct Extractor {
    pattern: Regex,
    extract: fn(&regex::Captures<'_>) -> String,
}

impl Extractor {
    fn new(pattern: &str, extract: fn(&regex::Captures<'_>) -> String) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("built-in extractor pattern is valid"),
            extract,
        }
    }

    fn apply(&self, message: &str) -> Option<String> {
        self.pattern.captures(message).map(|c| (self.extract)(&c))
    }
}

fn first_group(c: &regex::Captures<'_>) -> String {
    c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default()
}

fn first_group_trimmed(c: &regex::Captures<'_>) -> String {
    first_group(c).trim().to_string()
}

/// Run extractors in order; the first one that fits wins
fn extract_first(extractors: &[Extractor], message: &str) -> Option<String> {
    extractors.iter().find_map(|e| e.apply(message))
}

static VARIABLE_NAME: LazyLock<Vec<Extractor>> = LazyLock::new(|| {
    vec![
        // NameError: name 'x' is not defined
        Extractor::new(r"name '([^']+)' is not defined", first_group),
        // TypeError: 'int' object is not callable
        Extractor::new(r"'([^']+)' object is not callable", |c| {
            format!("variable_of_type_{}", first_group(c))
        }),
    ]
});

static OBJECT_TYPE: LazyLock<Vec<Extractor>> =
    LazyLock::new(|| vec![Extractor::new(r"'([^']+)' object", first_group)]);

static OPERATION: LazyLock<Vec<Extractor>> = LazyLock::new(|| {
    vec![Extractor::new(
        r"unsupported operand type\(s\) for (.+):",
        first_group_trimmed,
    )]
});

static BAD_VALUE: LazyLock<Vec<Extractor>> = LazyLock::new(|| {
    vec![
        Extractor::new(
            r"invalid literal for int\(\) with base \d+: '([^']*)'",
            first_group,
        ),
        Extractor::new(r"could not convert string to float: '([^']*)'", first_group),
    ]
});

static OPERAND_TYPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"unsupported operand type\(s\) for (.+): '([^']+)' and '([^']+)'")
        .expect("built-in operand pattern is valid")
});

static NOT_ENOUGH_VALUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"not enough values to unpack \(expected (\d+), got (\d+)\)")
        .expect("built-in unpack pattern is valid")
});

static TOO_MANY_VALUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"too many values to unpack \(expected (\d+)")
        .expect("built-in unpack pattern is valid")
});

/// Turns exception contexts into fact sets and evaluates predicates over them
#[derive(Debug, Clone)]
pub struct ContextAnalyzer {
    common_modules: HashSet<&'static str>,
    builtin_typos: HashMap<&'static str, &'static str>,
}

impl Default for ContextAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextAnalyzer {
    pub fn new() -> Self {
        Self {
            common_modules: COMMON_MODULES.iter().copied().collect(),
            builtin_typos: BUILTIN_TYPOS.iter().copied().collect(),
        }
    }

    /// Analyze one exception occurrence.
    pub fn analyze(&self, ctx: &ExceptionContext) -> FactSet {
        let message = ctx.exception_message.as_str();
        let variable_name =
            extract_first(&VARIABLE_NAME, message).unwrap_or_else(|| UNKNOWN_VARIABLE.to_string());
        let deepest = ctx.deepest_frame();
        let function_name = deepest
            .map(|f| f.function_name.clone())
            .unwrap_or_else(|| MODULE_LEVEL.to_string());

        let mut facts = FactSet::new();
        facts.insert("exception_type", ctx.exception_type.as_str());
        facts.insert("exception_message", message);
        facts.insert(
            "filename",
            deepest.map(|f| f.filename.as_str()).unwrap_or(INTERACTIVE),
        );
        facts.insert("line_number", deepest.map(|f| f.line_number).unwrap_or(0));
        facts.insert(
            "inside_function",
            deepest.map(|f| !f.is_module_level()).unwrap_or(false),
        );
        facts.insert("function_name", function_name);
        facts.insert("available_variables", available_variables(ctx));
        facts.insert("imported_modules", Vec::<String>::new());
        facts.insert(
            "object_type",
            extract_first(&OBJECT_TYPE, message).unwrap_or_else(|| UNKNOWN_VARIABLE.to_string()),
        );

        self.analyze_similarity(&mut facts, &variable_name);
        self.analyze_import_pattern(&mut facts, &variable_name);
        self.analyze_builtin_typo(&mut facts, &variable_name);
        facts.insert("variable_name", variable_name);

        analyze_type_error(&mut facts, &ctx.exception_type, message);
        analyze_value_error(&mut facts, &ctx.exception_type, message);

        facts
    }

    fn analyze_similarity(&self, facts: &mut FactSet, variable_name: &str) {
        let candidates = facts.list("available_variables").to_vec();
        let similar = if variable_name.is_empty() {
            Vec::new()
        } else {
            close_matches(variable_name, &candidates, MAX_SIMILAR, SIMILARITY_CUTOFF)
        };

        let closest = similar.first().map(|(name, _)| name.clone());
        let score = similar.first().map(|(_, score)| *score).unwrap_or(0.0);

        facts.insert("similar_variables_exist", !similar.is_empty());
        facts.insert(
            "similar_variables",
            similar.into_iter().map(|(name, _)| name).collect::<Vec<_>>(),
        );
        facts.insert("closest_variable", closest);
        facts.insert("similarity_score", score);
    }

    fn analyze_import_pattern(&self, facts: &mut FactSet, variable_name: &str) {
        let looks_like_import = self
            .common_modules
            .contains(variable_name.to_lowercase().as_str());
        facts.insert("looks_like_import", looks_like_import);
    }

    fn analyze_builtin_typo(&self, facts: &mut FactSet, variable_name: &str) {
        let correction = self
            .builtin_typos
            .get(variable_name.to_lowercase().as_str())
            .copied();
        facts.insert("builtin_typo_detected", correction.is_some());
        facts.insert("correct_builtin", correction);
    }

    /// Evaluate a single predicate against analyzed facts.
    pub fn check_predicate(&self, predicate: &ContextPredicate, facts: &FactSet) -> bool {
        match predicate {
            ContextPredicate::VariableSimilarity {
                threshold,
                min_matches,
            } => {
                facts.number("similarity_score") >= *threshold
                    && facts.list("similar_variables").len() >= *min_matches
            }
            ContextPredicate::ImportPattern { modules } => {
                facts.flag("looks_like_import")
                    && (modules.is_empty()
                        || modules.iter().any(|m| m == facts.text("variable_name")))
            }
            ContextPredicate::BuiltinTypo { functions } => {
                facts.flag("builtin_typo_detected")
                    && (functions.is_empty()
                        || functions.iter().any(|f| f == facts.text("correct_builtin")))
            }
            ContextPredicate::FileExtension { extensions } => {
                let filename = facts.text("filename");
                extensions.is_empty()
                    || extensions
                        .iter()
                        .any(|ext| filename.ends_with(ext.as_str()))
            }
            ContextPredicate::FunctionContext { inside_function } => {
                *inside_function == Some(facts.flag("inside_function"))
            }
            ContextPredicate::Unknown { kind } => {
                tracing::debug!(kind = %kind, "unknown predicate kind treated as satisfied");
                true
            }
        }
    }
}

/// Local variable names worth suggesting: no internal names, nothing shorter
/// than two characters, sorted and de-duplicated.
fn available_variables(ctx: &ExceptionContext) -> Vec<String> {
    // BTreeMap keys arrive sorted and unique
    ctx.local_variables
        .keys()
        .filter(|name| !name.starts_with('_') && name.chars().count() >= 2)
        .cloned()
        .collect()
}

/// Similarity ratio between two strings in `[0, 1]`: twice the number of
/// matching characters over the total length of both.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    // Counted in f64: the f32 ratio from `similar` misses exact thresholds like 0.7
    let matches = TextDiff::from_chars(a, b)
        .iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Equal)
        .count();
    let total = a.chars().count() + b.chars().count();
    2.0 * matches as f64 / total as f64
}

/// Up to `n` candidates whose similarity to `word` is at least `cutoff`,
/// best first. Equal scores rank the lexicographically greater name first.
pub fn close_matches(
    word: &str,
    candidates: &[String],
    n: usize,
    cutoff: f64,
) -> Vec<(String, f64)> {
    let mut scored: Vec<(String, f64)> = candidates
        .iter()
        .map(|c| (c.clone(), similarity(word, c)))
        .filter(|(_, score)| *score >= cutoff)
        .collect();

    scored.sort_by(|(a_name, a_score), (b_name, b_score)| {
        b_score
            .partial_cmp(a_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b_name.cmp(a_name))
    });
    scored.truncate(n);
    scored
}

fn analyze_type_error(facts: &mut FactSet, exception_type: &str, message: &str) {
    let is_type_error = exception_type == TYPE_ERROR;
    let operation = is_type_error
        .then(|| extract_first(&OPERATION, message))
        .flatten()
        .unwrap_or_else(|| "operation".to_string());
    facts.insert("operation", operation);
    facts.insert("type1", FactValue::Null);
    facts.insert("type2", FactValue::Null);

    if !is_type_error {
        return;
    }

    if let Some(caps) = OPERAND_TYPES.captures(message) {
        facts.insert("operation", caps[1].trim());
        facts.insert("type1", &caps[2]);
        facts.insert("type2", &caps[3]);
    }
}

fn analyze_value_error(facts: &mut FactSet, exception_type: &str, message: &str) {
    let is_value_error = exception_type == VALUE_ERROR;
    let bad_value = is_value_error
        .then(|| extract_first(&BAD_VALUE, message))
        .flatten()
        .unwrap_or_else(|| "value".to_string());
    facts.insert("bad_value", bad_value);
    facts.insert("expected", FactValue::Null);
    facts.insert("actual", FactValue::Null);

    if !is_value_error {
        return;
    }

    if let Some(caps) = NOT_ENOUGH_VALUES.captures(message) {
        facts.insert("expected", caps[1].parse::<i64>().ok());
        facts.insert("actual", caps[2].parse::<i64>().ok());
    } else if let Some(caps) = TOO_MANY_VALUES.captures(message) {
        facts.insert("expected", caps[1].parse::<i64>().ok());
    }
}
