//! Template rendering for explanation content.
//!
//! Templates go through two stages against an immutable [`FactSet`]:
//!
//! 1. Conditional blocks: `{if expr}...{endif}` and
//!    `{if expr}...{else}...{endif}` are replaced by the chosen branch.
//!    Blocks do not nest; each block ends at the first `{endif}` after it.
//! 2. Substitution: `{name}` and `{name:format}` become fact values. Unknown
//!    names render as `{unknown_variable_<name>}` so authoring mistakes stay
//!    visible.
//!
//! Conditions are a deliberately tiny language: `always`, a bare fact name
//! (truthiness), or `<fact> > <number>`. Anything else is false.

use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

use crate::facts::{FactSet, FactValue};
use crate::pack::{Example, Rule, RuleContent, Suggestion};

/// Condition that always holds
pub const ALWAYS: &str = "always";

static IF_ELSE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{if\s+([^}]+)\}(.*?)\{else\}(.*?)\{endif\}")
        .expect("built-in if/else pattern is valid")
});

static IF_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{if\s+([^}]+)\}(.*?)\{endif\}").expect("built-in if pattern is valid")
});

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("built-in token pattern is valid"));

/// A fully rendered explanation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedExplanation {
    pub title: String,
    pub explanation: String,
    pub suggestions: Vec<String>,
    pub examples: Vec<RenderedExample>,
    pub metadata: ExplanationMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedExample {
    pub description: String,
    pub code: String,
    pub id: String,
}

/// Where a rendered explanation came from. Pack fields are filled in by
/// the engine, which knows which pack the rule belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationMetadata {
    pub explanation_id: String,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack_author: Option<String>,
}

/// Renders rule content against analyzed facts
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a rule's content; pack metadata is left for the caller.
    pub fn render_rule(&self, rule: &Rule, facts: &FactSet) -> RenderedExplanation {
        self.render(&rule.content, &rule.id, rule.priority, facts)
    }

    pub fn render(
        &self,
        content: &RuleContent,
        explanation_id: &str,
        priority: i64,
        facts: &FactSet,
    ) -> RenderedExplanation {
        RenderedExplanation {
            title: self.render_template(&content.title, facts),
            explanation: self.render_template(&content.description, facts),
            suggestions: self.render_suggestions(&content.suggestions, facts),
            examples: self.render_examples(&content.examples, facts),
            metadata: ExplanationMetadata {
                explanation_id: explanation_id.to_string(),
                priority,
                pack_name: None,
                pack_version: None,
                pack_author: None,
            },
        }
    }

    /// Render one template string: conditionals, then substitution, then trim.
    pub fn render_template(&self, template: &str, facts: &FactSet) -> String {
        if template.is_empty() {
            return String::new();
        }
        let resolved = resolve_conditionals(template, facts);
        substitute(&resolved, facts).trim().to_string()
    }

    /// Suggestions passing their condition, in ascending order of their own
    /// priority. Suggestions that render empty are dropped.
    fn render_suggestions(&self, suggestions: &[Suggestion], facts: &FactSet) -> Vec<String> {
        let mut rendered: Vec<(i64, String)> = suggestions
            .iter()
            .filter(|s| evaluate_condition(&s.condition, facts))
            .map(|s| (s.priority, self.render_template(&s.template, facts)))
            .collect();

        rendered.sort_by_key(|(priority, _)| *priority);

        rendered
            .into_iter()
            .filter_map(|(_, text)| (!text.is_empty()).then_some(text))
            .collect()
    }

    /// Examples passing their condition, in catalog order. An example is kept
    /// only when both its description and code render non-empty.
    fn render_examples(&self, examples: &[Example], facts: &FactSet) -> Vec<RenderedExample> {
        examples
            .iter()
            .filter(|e| evaluate_condition(&e.condition, facts))
            .filter_map(|e| {
                let description = self.render_template(&e.description, facts);
                let code = self.render_template(&e.code, facts);
                (!description.is_empty() && !code.is_empty()).then(|| RenderedExample {
                    description,
                    code,
                    id: e.id.clone(),
                })
            })
            .collect()
    }
}

/// Replace conditional blocks with their chosen branch.
fn resolve_conditionals(template: &str, facts: &FactSet) -> String {
    let with_else = IF_ELSE_BLOCK.replace_all(template, |caps: &Captures<'_>| {
        if evaluate_condition(caps[1].trim(), facts) {
            caps[2].to_string()
        } else {
            caps[3].to_string()
        }
    });

    IF_BLOCK
        .replace_all(&with_else, |caps: &Captures<'_>| {
            if evaluate_condition(caps[1].trim(), facts) {
                caps[2].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Replace `{name}` and `{name:format}` tokens with fact values.
fn substitute(template: &str, facts: &FactSet) -> String {
    TOKEN
        .replace_all(template, |caps: &Captures<'_>| {
            let token = &caps[1];
            match token.split_once(':') {
                Some((name, spec)) => match facts.get(name) {
                    Some(value) => format_value(value, spec),
                    None => placeholder(name),
                },
                None => facts
                    .get(token)
                    .map(FactValue::to_string)
                    .unwrap_or_else(|| placeholder(token)),
            }
        })
        .into_owned()
}

fn placeholder(name: &str) -> String {
    format!("{{unknown_variable_{name}}}")
}

/// Apply a format spec: `.0%` renders a percentage with no decimals, `.Nf`
/// a fixed-point number. Anything else, or a non-numeric value, renders the
/// value as-is.
fn format_value(value: &FactValue, spec: &str) -> String {
    let Some(number) = value.as_f64() else {
        return value.to_string();
    };

    if spec == ".0%" {
        return format!("{:.0}%", number * 100.0);
    }

    spec.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix('f'))
        .and_then(|digits| digits.parse::<usize>().ok())
        .map(|decimals| format!("{number:.decimals$}"))
        .unwrap_or_else(|| value.to_string())
}

/// Evaluate a condition expression against facts.
pub fn evaluate_condition(condition: &str, facts: &FactSet) -> bool {
    let condition = condition.trim();
    if condition == ALWAYS {
        return true;
    }

    if let Some(value) = facts.get(condition) {
        if *value != FactValue::Null {
            return value.is_truthy();
        }
    }

    if let Some((left, right)) = condition.split_once(" > ") {
        let Ok(threshold) = right.trim().parse::<f64>() else {
            return false;
        };
        return match facts.get(left.trim()) {
            Some(value) => value.as_f64().is_some_and(|n| n > threshold),
            // a missing fact compares as zero
            None => 0.0 > threshold,
        };
    }

    false
}
