//! Explanation engine.
//!
//! Owns the loaded packs and the derived match list, and runs
//! analyze → match → render for one exception at a time. The engine loads
//! lazily on the first explanation. It never fails outward: an empty
//! catalog, a missing match or a panic inside matching all come back as
//! `None`.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::context::ExceptionContext;
use crate::facts::FactSet;
use crate::matcher::{PatternMatcher, RuleMatch};
use crate::pack::{Rule, RulePack};
use crate::template::{RenderedExplanation, TemplateRenderer};

/// Where an engine gets its packs from
pub trait PackSource: Send {
    /// Load every available pack, resetting previously recorded errors
    fn load_all(&mut self) -> Vec<RulePack>;

    /// Load one extra pack file
    fn load_file(&mut self, path: &Path) -> Option<RulePack>;

    /// Problems found while loading, as human-readable strings
    fn validation_errors(&self) -> Vec<String>;
}

/// An in-memory pack source. Packs failing validation are dropped on load.
#[derive(Debug, Clone, Default)]
pub struct StaticPacks {
    packs: Vec<RulePack>,
    errors: Vec<String>,
}

impl StaticPacks {
    pub fn new(packs: Vec<RulePack>) -> Self {
        Self {
            packs,
            errors: Vec::new(),
        }
    }
}

impl PackSource for StaticPacks {
    fn load_all(&mut self) -> Vec<RulePack> {
        self.errors.clear();
        let mut valid = Vec::with_capacity(self.packs.len());
        for pack in &self.packs {
            match pack.validate() {
                Ok(()) => valid.push(pack.clone()),
                Err(err) => self.errors.push(err.to_string()),
            }
        }
        valid
    }

    fn load_file(&mut self, path: &Path) -> Option<RulePack> {
        self.errors
            .push(format!("Cannot load {}: source has no files", path.display()));
        None
    }

    fn validation_errors(&self) -> Vec<String> {
        self.errors.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Unloaded,
    Loaded,
}

/// Summary of what an engine has loaded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatistics {
    pub loaded_packs: usize,
    pub total_rules: usize,
    /// Sorted and de-duplicated
    pub exception_types_covered: Vec<String>,
    pub validation_errors: Vec<String>,
}

pub struct Engine {
    source: Box<dyn PackSource>,
    state: LoadState,
    packs: Vec<Arc<RulePack>>,
    matcher: PatternMatcher,
    renderer: TemplateRenderer,
}

impl Engine {
    pub fn new(source: impl PackSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            state: LoadState::Unloaded,
            packs: Vec::new(),
            matcher: PatternMatcher::new(),
            renderer: TemplateRenderer::new(),
        }
    }

    /// An engine over a fixed set of in-memory packs
    pub fn with_packs(packs: Vec<RulePack>) -> Self {
        Self::new(StaticPacks::new(packs))
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    /// Load packs from the source if not already loaded.
    ///
    /// Finding no packs is not an error: the engine is then loaded but empty
    /// and every explanation comes back as `None`.
    pub fn load(&mut self) {
        if self.is_loaded() {
            return;
        }

        self.packs.clear();
        for pack in self.source.load_all() {
            self.insert_pack(pack);
        }
        self.matcher.load(&self.packs);
        self.state = LoadState::Loaded;

        if self.packs.is_empty() {
            tracing::warn!("no explanation packs loaded; explanations are unavailable");
        } else {
            tracing::debug!(
                packs = self.packs.len(),
                rules = self.matcher.len(),
                "engine loaded"
            );
        }
    }

    /// Drop everything and load again from the source.
    pub fn reload(&mut self) {
        self.state = LoadState::Unloaded;
        self.packs.clear();
        self.matcher.clear();
        self.load();
    }

    /// Load one more pack file and rebuild the match list. A pack with the
    /// same name as a loaded one replaces it.
    pub fn load_additional_pack(&mut self, path: &Path) -> bool {
        self.load();
        match self.source.load_file(path) {
            Some(pack) => {
                self.insert_pack(pack);
                self.matcher.load(&self.packs);
                true
            }
            None => false,
        }
    }

    fn insert_pack(&mut self, pack: RulePack) {
        let pack = Arc::new(pack);
        match self.packs.iter_mut().find(|p| p.name() == pack.name()) {
            Some(slot) => {
                tracing::debug!(pack = %pack.name(), "replacing previously loaded pack");
                *slot = pack;
            }
            None => self.packs.push(pack),
        }
    }

    /// Explain an exception with the best matching rule.
    pub fn explain(&mut self, ctx: &ExceptionContext) -> Option<RenderedExplanation> {
        self.guarded(|engine| {
            engine.load();
            let found = engine.matcher.find_best(ctx)?;
            Some(engine.render_match(&found))
        })
        .flatten()
    }

    /// Every matching rule, rendered, in selection order.
    pub fn explain_all(&mut self, ctx: &ExceptionContext) -> Vec<RenderedExplanation> {
        self.guarded(|engine| {
            engine.load();
            engine
                .matcher
                .find_all(ctx)
                .iter()
                .map(|found| engine.render_match(found))
                .collect()
        })
        .unwrap_or_default()
    }

    /// The facts the matcher would see for this exception
    pub fn analyze(&self, ctx: &ExceptionContext) -> FactSet {
        self.matcher.analyzer().analyze(ctx)
    }

    /// Run `f`, turning a panic into `None`.
    ///
    /// The panic hook is left alone since it is process-wide, so the
    /// standard `thread '..' panicked at` line still reaches stderr before
    /// the `warn!` event. Hosts that want silence install their own hook.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(value) => Some(value),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(%reason, "explanation failed");
                None
            }
        }
    }

    fn render_match(&self, found: &RuleMatch<'_>) -> RenderedExplanation {
        let mut rendered = self.renderer.render_rule(found.rule, &found.facts);
        let meta = &found.pack.metadata;
        rendered.metadata.pack_name = Some(meta.name.clone());
        rendered.metadata.pack_version = Some(meta.version.clone());
        rendered.metadata.pack_author = Some(meta.author.clone());
        rendered
    }

    pub fn packs(&self) -> impl Iterator<Item = &RulePack> {
        self.packs.iter().map(Arc::as_ref)
    }

    pub fn pack(&self, name: &str) -> Option<&RulePack> {
        self.packs().find(|p| p.name() == name)
    }

    /// Loaded packs declaring the exception type among their targets
    pub fn packs_for_exception_type(&self, exception_type: &str) -> Vec<&RulePack> {
        self.packs().filter(|p| p.targets(exception_type)).collect()
    }

    pub fn rules_for_exception_type(&self, exception_type: &str) -> Vec<&Rule> {
        self.matcher.rules_for_exception_type(exception_type)
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.source.validation_errors()
    }

    pub fn statistics(&mut self) -> EngineStatistics {
        self.load();

        let mut exception_types: Vec<String> = self
            .matcher
            .exception_types()
            .into_iter()
            .map(str::to_string)
            .collect();
        exception_types.sort();
        exception_types.dedup();

        EngineStatistics {
            loaded_packs: self.packs.len(),
            total_rules: self.matcher.len(),
            exception_types_covered: exception_types,
            validation_errors: self.validation_errors(),
        }
    }
}

/// An engine shared between threads.
///
/// Reloads and explanations are serialized through one lock, so an
/// explanation never sees a half-rebuilt catalog.
#[derive(Clone)]
pub struct SharedEngine(Arc<Mutex<Engine>>);

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    // A panic while holding the lock is already contained by the engine,
    // so a poisoned lock still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, Engine> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn explain(&self, ctx: &ExceptionContext) -> Option<RenderedExplanation> {
        self.lock().explain(ctx)
    }

    pub fn reload(&self) {
        self.lock().reload();
    }

    pub fn load_additional_pack(&self, path: &Path) -> bool {
        self.lock().load_additional_pack(path)
    }

    pub fn statistics(&self) -> EngineStatistics {
        self.lock().statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::PackLoader;
    use crate::pack::tests::{metadata, rule};
    use crate::pack::{RuleContent, Suggestion};
    use std::fs;
    use tempfile::TempDir;

    fn name_error(name: &str) -> ExceptionContext {
        ExceptionContext::new("NameError", format!("name '{name}' is not defined"))
    }

    fn pack(name: &str, rules: Vec<Rule>) -> RulePack {
        RulePack::new(metadata(name), rules)
    }

    struct PanickingSource;

    impl PackSource for PanickingSource {
        fn load_all(&mut self) -> Vec<RulePack> {
            panic!("source exploded");
        }

        fn load_file(&mut self, _path: &Path) -> Option<RulePack> {
            None
        }

        fn validation_errors(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_empty_catalog_returns_none() {
        let mut engine = Engine::with_packs(Vec::new());
        assert!(engine.explain(&name_error("x")).is_none());
        assert!(engine.is_loaded());
        let stats = engine.statistics();
        assert_eq!(stats.loaded_packs, 0);
        assert_eq!(stats.total_rules, 0);
    }

    #[test]
    fn test_lazy_load_on_first_explain() {
        let mut engine =
            Engine::with_packs(vec![pack("p", vec![rule("r", 1, "NameError", "defined")])]);
        assert!(!engine.is_loaded());
        assert!(engine.explain(&name_error("x")).is_some());
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_explain_attaches_pack_metadata() {
        let mut r = rule("undefined", 7, "NameError", "is not defined");
        r.content = RuleContent {
            title: "Undefined {variable_name}".to_string(),
            description: "  {variable_name} is missing  ".to_string(),
            suggestions: vec![
                Suggestion {
                    template: "second".to_string(),
                    priority: 2,
                    condition: "always".to_string(),
                },
                Suggestion {
                    template: "first".to_string(),
                    priority: 1,
                    condition: "always".to_string(),
                },
            ],
            examples: Vec::new(),
        };
        let mut engine = Engine::with_packs(vec![pack("demo", vec![r])]);

        let rendered = engine.explain(&name_error("totl")).unwrap();
        assert_eq!(rendered.title, "Undefined totl");
        assert_eq!(rendered.explanation, "totl is missing");
        assert_eq!(rendered.suggestions, vec!["first", "second"]);
        assert_eq!(rendered.metadata.explanation_id, "undefined");
        assert_eq!(rendered.metadata.priority, 7);
        assert_eq!(rendered.metadata.pack_name.as_deref(), Some("demo"));
        assert_eq!(rendered.metadata.pack_version.as_deref(), Some("1.0.0"));
        assert_eq!(rendered.metadata.pack_author.as_deref(), Some("Test Author"));
    }

    #[test]
    fn test_explain_all_in_selection_order() {
        let mut engine = Engine::with_packs(vec![pack(
            "p",
            vec![
                rule("low", 1, "NameError", "defined"),
                rule("high", 9, "NameError", "defined"),
                rule("other", 50, "KeyError", "."),
            ],
        )]);
        let ids: Vec<String> = engine
            .explain_all(&name_error("x"))
            .into_iter()
            .map(|r| r.metadata.explanation_id)
            .collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn test_panic_in_source_is_contained() {
        let mut engine = Engine::new(PanickingSource);
        assert!(engine.explain(&name_error("x")).is_none());
        assert!(engine.explain_all(&name_error("x")).is_empty());
    }

    #[test]
    fn test_invalid_static_pack_reported() {
        let mut engine = Engine::with_packs(vec![
            pack("empty", Vec::new()),
            pack("ok", vec![rule("r", 1, "NameError", "defined")]),
        ]);
        let stats = engine.statistics();
        assert_eq!(stats.loaded_packs, 1);
        assert_eq!(stats.validation_errors.len(), 1);
        assert!(stats.validation_errors[0].starts_with("No valid explanations found"));
    }

    #[test]
    fn test_statistics_types_sorted_and_deduplicated() {
        let mut engine = Engine::with_packs(vec![
            pack("a", vec![rule("k", 1, "KeyError", "."), rule("n1", 5, "NameError", "x")]),
            pack("b", vec![rule("n2", 3, "NameError", "y")]),
        ]);
        let stats = engine.statistics();
        assert_eq!(stats.loaded_packs, 2);
        assert_eq!(stats.total_rules, 3);
        assert_eq!(stats.exception_types_covered, vec!["KeyError", "NameError"]);
    }

    #[test]
    fn test_same_name_pack_replaces_earlier() {
        let mut engine = Engine::with_packs(vec![
            pack("dup", vec![rule("old", 1, "NameError", "defined")]),
            pack("dup", vec![rule("new", 1, "NameError", "defined")]),
        ]);
        let rendered = engine.explain(&name_error("x")).unwrap();
        assert_eq!(rendered.metadata.explanation_id, "new");
        assert_eq!(engine.packs().count(), 1);
    }

    #[test]
    fn test_packs_for_exception_type() {
        let mut other = metadata("other");
        other.targets = vec!["KeyError".to_string()];
        let mut engine = Engine::with_packs(vec![
            pack("names", vec![rule("r", 1, "NameError", "x")]),
            RulePack::new(other, vec![rule("k", 1, "KeyError", ".")]),
        ]);
        engine.load();
        let names: Vec<&str> = engine
            .packs_for_exception_type("KeyError")
            .into_iter()
            .map(RulePack::name)
            .collect();
        assert_eq!(names, vec!["other"]);
        assert_eq!(engine.rules_for_exception_type("NameError").len(), 1);
        assert!(engine.pack("names").is_some());
    }

    #[test]
    fn test_load_additional_pack_and_reload() {
        let dir = TempDir::new().unwrap();
        let extra = dir.path().join("extra.yaml");
        fs::write(
            &extra,
            r#"
metadata:
  name: extra
  version: "2.0.0"
  description: Extra rules
  author: Someone
  license: MIT
  min_engine_version: "0.1.0"
  targets: [KeyError]
explanations:
  - id: key-missing
    priority: 100
    conditions:
      exception_type: KeyError
      message_patterns: ["."]
    explanation:
      title: "No key {exception_message}"
      description: "Missing."
"#,
        )
        .unwrap();

        let mut engine = Engine::new(PackLoader::new().with_core(false));
        let key_error = ExceptionContext::new("KeyError", "'k'");
        assert!(engine.explain(&key_error).is_none());

        assert!(engine.load_additional_pack(&extra));
        let rendered = engine.explain(&key_error).unwrap();
        assert_eq!(rendered.title, "No key 'k'");
        assert_eq!(rendered.metadata.pack_version.as_deref(), Some("2.0.0"));

        assert!(!engine.load_additional_pack(&dir.path().join("missing.yaml")));
        assert_eq!(engine.validation_errors().len(), 1);

        // reload goes back to the source, which does not know the extra file
        engine.reload();
        assert!(engine.explain(&key_error).is_none());
        assert!(engine.validation_errors().is_empty());
    }

    #[test]
    fn test_core_pack_explains_typo() {
        let mut engine = Engine::new(PackLoader::new());
        let rendered = engine.explain(&name_error("pirnt")).unwrap();
        assert_eq!(rendered.metadata.explanation_id, "name-error-builtin-typo");
        assert!(rendered.title.contains("pirnt"));
        assert!(rendered.suggestions[0].contains("'print'"));
        assert_eq!(rendered.metadata.pack_name.as_deref(), Some("python-builtins"));
    }

    #[test]
    fn test_core_pack_explains_similar_variable() {
        let mut engine = Engine::new(PackLoader::new());
        let ctx = name_error("totl").local_names(["total", "count"]);
        let rendered = engine.explain(&ctx).unwrap();
        assert_eq!(rendered.metadata.explanation_id, "name-error-similar-variable");
        assert_eq!(rendered.suggestions[0], "Did you mean 'total'?");
        assert!(rendered.explanation.contains("% similar"));
    }

    #[test]
    fn test_shared_engine_across_threads() {
        let shared = SharedEngine::new(Engine::with_packs(vec![pack(
            "p",
            vec![rule("r", 1, "NameError", "defined")],
        )]));

        std::thread::scope(|scope| {
            for i in 0..4 {
                let shared = shared.clone();
                scope.spawn(move || {
                    if i == 0 {
                        shared.reload();
                    }
                    assert!(shared.explain(&name_error("x")).is_some());
                });
            }
        });

        assert_eq!(shared.statistics().total_rules, 1);
    }
}
