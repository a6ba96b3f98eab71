//! Rule selection.
//!
//! All rules from all loaded packs are flattened into a single list, tagged
//! with their pack, and stably sorted by descending priority. Equal
//! priorities keep pack order, then in-pack order. A rule matches when:
//!
//! 1. its exception type equals the runtime type exactly,
//! 2. at least one message pattern is found in the message (case-insensitive),
//! 3. every context predicate holds for the analyzed facts.
//!
//! The list is rebuilt wholesale on every load.

use regex::{Regex, RegexBuilder};
use std::sync::Arc;

use crate::analyzer::ContextAnalyzer;
use crate::context::ExceptionContext;
use crate::facts::FactSet;
use crate::pack::{Rule, RulePack};

struct MatchEntry {
    pack: Arc<RulePack>,
    rule_index: usize,
    /// Compiled message patterns; patterns that failed to compile are absent
    patterns: Vec<Regex>,
}

impl MatchEntry {
    fn rule(&self) -> &Rule {
        &self.pack.rules[self.rule_index]
    }

    fn matches_message(&self, message: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(message))
    }
}

/// A rule that matched, with the pack it came from and the facts it matched on
#[derive(Debug, Clone)]
pub struct RuleMatch<'a> {
    pub rule: &'a Rule,
    pub pack: &'a RulePack,
    pub facts: FactSet,
}

#[derive(Default)]
pub struct PatternMatcher {
    entries: Vec<MatchEntry>,
    analyzer: ContextAnalyzer,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the matcher state with the rules of `packs`.
    pub fn load(&mut self, packs: &[Arc<RulePack>]) {
        let mut entries: Vec<MatchEntry> = packs
            .iter()
            .flat_map(|pack| {
                pack.rules.iter().enumerate().map(move |(rule_index, rule)| MatchEntry {
                    pack: Arc::clone(pack),
                    rule_index,
                    patterns: compile_patterns(pack.name(), rule),
                })
            })
            .collect();

        // Vec::sort_by is stable, which is what resolves equal priorities
        entries.sort_by(|a, b| b.rule().priority.cmp(&a.rule().priority));

        tracing::debug!(
            packs = packs.len(),
            rules = entries.len(),
            "loaded rules into matcher"
        );
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of loaded rules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn analyzer(&self) -> &ContextAnalyzer {
        &self.analyzer
    }

    /// The highest-priority rule matching the exception, if any.
    pub fn find_best(&self, ctx: &ExceptionContext) -> Option<RuleMatch<'_>> {
        let facts = self.analyzer.analyze(ctx);
        let entry = self
            .entries
            .iter()
            .find(|entry| self.matches(entry, ctx, &facts))?;
        tracing::debug!(
            rule = %entry.rule().id,
            pack = %entry.pack.name(),
            "selected explanation"
        );
        Some(RuleMatch {
            rule: entry.rule(),
            pack: &entry.pack,
            facts,
        })
    }

    /// Every rule matching the exception, in selection order.
    pub fn find_all(&self, ctx: &ExceptionContext) -> Vec<RuleMatch<'_>> {
        let facts = self.analyzer.analyze(ctx);
        self.entries
            .iter()
            .filter(|entry| self.matches(entry, ctx, &facts))
            .map(|entry| RuleMatch {
                rule: entry.rule(),
                pack: &entry.pack,
                facts: facts.clone(),
            })
            .collect()
    }

    /// Loaded rules handling a given exception type, in selection order.
    pub fn rules_for_exception_type(&self, exception_type: &str) -> Vec<&Rule> {
        self.entries
            .iter()
            .map(MatchEntry::rule)
            .filter(|rule| rule.conditions.exception_type == exception_type)
            .collect()
    }

    /// Distinct exception types covered by loaded rules, in selection order.
    pub fn exception_types(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            let name = entry.rule().conditions.exception_type.as_str();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    fn matches(&self, entry: &MatchEntry, ctx: &ExceptionContext, facts: &FactSet) -> bool {
        let conditions = &entry.rule().conditions;

        conditions.exception_type == ctx.exception_type
            && entry.matches_message(&ctx.exception_message)
            && conditions
                .context_conditions
                .iter()
                .all(|predicate| {
                    let satisfied = self.analyzer.check_predicate(predicate, facts);
                    if !satisfied {
                        tracing::debug!(
                            rule = %entry.rule().id,
                            predicate = predicate.kind(),
                            "context predicate not satisfied"
                        );
                    }
                    satisfied
                })
    }
}

/// Compile a rule's message patterns case-insensitively, skipping any that
/// are not valid regexes.
fn compile_patterns(pack_name: &str, rule: &Rule) -> Vec<Regex> {
    rule.conditions
        .message_patterns
        .iter()
        .filter_map(|pattern| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(
                        pack = %pack_name,
                        rule = %rule.id,
                        pattern = %pattern,
                        error = %err,
                        "skipping invalid message pattern"
                    );
                    None
                }
            }
        })
        .collect()
}
