//! Pack loading from disk and from the built-in core pack.
//!
//! Packs are YAML (`.yaml`, `.yml`) or TOML (`.toml`) documents of the form
//! `{metadata: {...}, explanations: [...]}`. A rule that fails to parse is
//! skipped and reported; a pack left with no rules, or with bad metadata, is
//! rejected. Problems are collected as readable strings, never raised.

use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::config::{expand_home, Config};
use crate::engine::PackSource;
use crate::error::PackError;
use crate::pack::{PackMetadata, Rule, RulePack};

/// Built-in pack explaining common Python builtin exceptions
const CORE_PACK: &str = include_str!("../packs/core/python-builtins.yaml");

/// Origin label used in messages about the core pack
pub const CORE_ORIGIN: &str = "<core>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFormat {
    Yaml,
    Toml,
}

impl PackFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(PackFormat::Yaml),
            "toml" => Some(PackFormat::Toml),
            _ => None,
        }
    }
}

/// Loads packs from the core pack and a list of directories
#[derive(Debug, Clone)]
pub struct PackLoader {
    directories: Vec<PathBuf>,
    include_core: bool,
    errors: Vec<String>,
}

impl Default for PackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PackLoader {
    /// A loader with the core pack and no directories
    pub fn new() -> Self {
        Self {
            directories: Vec::new(),
            include_core: true,
            errors: Vec::new(),
        }
    }

    /// A loader configured from the `[packs]` section
    pub fn from_config(config: &Config) -> Self {
        Self {
            directories: config
                .packs
                .directories
                .iter()
                .cloned()
                .map(expand_home)
                .collect(),
            include_core: config.packs.include_core,
            errors: Vec::new(),
        }
    }

    /// Builder: add a directory to scan
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    /// Builder: include or skip the core pack
    pub fn with_core(mut self, include: bool) -> Self {
        self.include_core = include;
        self
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Load the core pack, if enabled, then every configured directory.
    pub fn load_all(&mut self) -> Vec<RulePack> {
        let mut packs = Vec::new();

        if self.include_core {
            if let Some(core) = self.load_core() {
                packs.push(core);
            }
        }

        for dir in self.directories.clone() {
            packs.extend(self.load_directory(&dir));
        }

        packs
    }

    /// Parse the built-in core pack.
    pub fn load_core(&mut self) -> Option<RulePack> {
        let result = self.parse_pack(CORE_PACK, PackFormat::Yaml, CORE_ORIGIN);
        self.record(result)
    }

    /// Load every pack file in a directory, in file-name order.
    ///
    /// A missing directory is reported but is not an error for the caller.
    pub fn load_directory(&mut self, dir: &Path) -> Vec<RulePack> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.errors
                    .push(format!("Directory not readable: {}: {err}", dir.display()));
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && PackFormat::from_path(path).is_some())
            .collect();
        files.sort();

        tracing::debug!(dir = %dir.display(), files = files.len(), "scanning pack directory");

        files
            .iter()
            .filter_map(|path| self.load_pack(path))
            .collect()
    }

    /// Load a single pack file, recording any problem.
    pub fn load_pack(&mut self, path: &Path) -> Option<RulePack> {
        let result = self.read_pack(path);
        self.record(result)
    }

    fn read_pack(&mut self, path: &Path) -> Result<RulePack, PackError> {
        let format = PackFormat::from_path(path)
            .ok_or_else(|| PackError::UnsupportedFormat(path.to_path_buf()))?;

        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                PackError::NotFound(path.to_path_buf())
            } else {
                PackError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let pack = self.parse_pack(&text, format, &path.display().to_string())?;
        Ok(pack.with_source(path))
    }

    /// Parse pack text. Rules that fail to parse, and later rules reusing
    /// an id, are dropped with an error recorded.
    pub fn parse_pack(
        &mut self,
        text: &str,
        format: PackFormat,
        origin: &str,
    ) -> Result<RulePack, PackError> {
        let doc: Value = match format {
            PackFormat::Yaml => serde_yaml::from_str(text).map_err(|source| PackError::Yaml {
                origin: origin.to_string(),
                source,
            })?,
            PackFormat::Toml => toml::from_str(text).map_err(|source| PackError::Toml {
                origin: origin.to_string(),
                source,
            })?,
        };

        let invalid = |message: String| PackError::Invalid {
            origin: origin.to_string(),
            message,
        };

        let metadata_value = doc
            .get("metadata")
            .cloned()
            .ok_or_else(|| invalid("missing metadata section".to_string()))?;
        let metadata: PackMetadata = serde_json::from_value(metadata_value)
            .map_err(|err| invalid(format!("invalid metadata: {err}")))?;

        let raw_rules = doc
            .get("explanations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut rules: Vec<Rule> = Vec::with_capacity(raw_rules.len());
        for (index, raw) in raw_rules.into_iter().enumerate() {
            match serde_json::from_value::<Rule>(raw) {
                Ok(rule) if rules.iter().any(|r| r.id == rule.id) => {
                    self.errors.push(format!(
                        "Error parsing explanation {index} in {origin}: duplicate id '{}'",
                        rule.id
                    ));
                }
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    self.errors
                        .push(format!("Error parsing explanation {index} in {origin}: {err}"));
                }
            }
        }

        if rules.is_empty() {
            return Err(PackError::NoRules(origin.to_string()));
        }

        let pack = RulePack::new(metadata, rules);
        pack.validate()?;
        Ok(pack)
    }

    fn record(&mut self, result: Result<RulePack, PackError>) -> Option<RulePack> {
        match result {
            Ok(pack) => {
                tracing::debug!(
                    pack = %pack.name(),
                    version = %pack.metadata.version,
                    rules = pack.rules.len(),
                    "loaded pack"
                );
                Some(pack)
            }
            Err(err) => {
                tracing::warn!(error = %err, "rejected pack");
                self.errors.push(err.to_string());
                None
            }
        }
    }

    pub fn validation_errors(&self) -> &[String] {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

impl PackSource for PackLoader {
    fn load_all(&mut self) -> Vec<RulePack> {
        self.clear_errors();
        PackLoader::load_all(self)
    }

    fn load_file(&mut self, path: &Path) -> Option<RulePack> {
        self.load_pack(path)
    }

    fn validation_errors(&self) -> Vec<String> {
        self.errors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const YAML_PACK: &str = r#"
metadata:
  name: demo
  version: 1.2.0
  description: Demo pack
  author: Jane Doe
  license: MIT
  qinter_version: 0.1.0
  targets: [NameError]
explanations:
  - id: undefined-name
    priority: 10
    conditions:
      exception_type: NameError
      message_patterns: ["name '.*' is not defined"]
      context_conditions:
        - type: variable_similarity
          threshold: 0.7
    explanation:
      title: "Undefined {variable_name}"
      description: "Nothing named {variable_name} exists here."
      suggestions:
        - template: "Did you mean {closest_variable}?"
          priority: 1
          condition: similar_variables_exist
      examples:
        - id: fix
          description: Use the right name
          code: "print({closest_variable})"
"#;

    const TOML_PACK: &str = r#"
[metadata]
name = "toml-demo"
version = "0.1.0"
description = "TOML pack"
author = "Jane Doe"
license = "MIT"
min_engine_version = "0.1.0"
targets = ["KeyError"]

[[explanations]]
id = "missing-key"
priority = 5

[explanations.conditions]
exception_type = "KeyError"
message_patterns = ["."]

[explanations.explanation]
title = "Missing key"
description = "The key is not in the mapping."
"#;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_core_pack_loads() {
        let mut loader = PackLoader::new();
        let core = loader.load_core().expect("core pack parses");
        assert!(!core.rules.is_empty());
        assert!(core.targets("NameError"));
        assert!(loader.validation_errors().is_empty(), "{:?}", loader.validation_errors());
    }

    #[test]
    fn test_parse_yaml_pack() {
        let mut loader = PackLoader::new();
        let pack = loader.parse_pack(YAML_PACK, PackFormat::Yaml, "demo.yaml").unwrap();
        assert_eq!(pack.name(), "demo");
        assert_eq!(pack.metadata.min_engine_version, "0.1.0");
        let rule = &pack.rules[0];
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.conditions.context_conditions.len(), 1);
        assert_eq!(rule.content.suggestions[0].condition, "similar_variables_exist");
        assert_eq!(rule.content.examples[0].condition, "always");
    }

    #[test]
    fn test_parse_toml_pack() {
        let mut loader = PackLoader::new();
        let pack = loader.parse_pack(TOML_PACK, PackFormat::Toml, "demo.toml").unwrap();
        assert_eq!(pack.name(), "toml-demo");
        assert!(pack.rules[0].content.suggestions.is_empty());
    }

    #[test]
    fn test_numeric_versions_accepted() {
        let mut loader = PackLoader::new();
        let text = YAML_PACK
            .replace("version: 1.2.0", "version: 1.0")
            .replace("qinter_version: 0.1.0", "qinter_version: 2");
        let pack = loader.parse_pack(&text, PackFormat::Yaml, "p.yaml").unwrap();
        assert_eq!(pack.metadata.version, "1.0");
        assert_eq!(pack.metadata.min_engine_version, "2");

        let text = YAML_PACK.replace("qinter_version: 0.1.0", "min_engine_version: 0.1");
        let pack = loader.parse_pack(&text, PackFormat::Yaml, "p.yaml").unwrap();
        assert_eq!(pack.metadata.min_engine_version, "0.1");
    }

    #[test]
    fn test_missing_metadata_field_rejected() {
        let mut loader = PackLoader::new();
        let text = YAML_PACK.replace("  license: MIT\n", "");
        let err = loader.parse_pack(&text, PackFormat::Yaml, "demo.yaml").unwrap_err();
        assert!(err.to_string().contains("license"), "{err}");
    }

    #[test]
    fn test_bad_rule_skipped_and_reported() {
        let mut loader = PackLoader::new();
        let text = format!(
            "{YAML_PACK}  - id: broken\n    conditions:\n      exception_type: NameError\n"
        );
        let pack = loader.parse_pack(&text, PackFormat::Yaml, "demo.yaml").unwrap();
        assert_eq!(pack.rules.len(), 1);
        assert_eq!(loader.validation_errors().len(), 1);
        assert!(loader.validation_errors()[0]
            .starts_with("Error parsing explanation 1 in demo.yaml"));
    }

    #[test]
    fn test_pack_without_rules_rejected() {
        let mut loader = PackLoader::new();
        let header = YAML_PACK.split("explanations:").next().unwrap();
        let text = format!("{header}explanations: []\n");
        let err = loader.parse_pack(&text, PackFormat::Yaml, "empty.yaml").unwrap_err();
        assert!(matches!(err, PackError::NoRules(_)));
    }

    #[test]
    fn test_load_directory_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.yaml", YAML_PACK);
        write(&dir, "a.toml", TOML_PACK);
        write(&dir, "notes.txt", "not a pack");
        write(&dir, "broken.yml", "metadata: [unclosed");

        let mut loader = PackLoader::new().with_core(false).with_directory(dir.path());
        let packs = loader.load_all();
        let names: Vec<&str> = packs.iter().map(RulePack::name).collect();
        assert_eq!(names, vec!["toml-demo", "demo"]);
        assert_eq!(loader.validation_errors().len(), 1);
        assert!(loader.validation_errors()[0].contains("broken.yml"));
        assert!(packs[1].source.as_ref().unwrap().ends_with("b.yaml"));
    }

    #[test]
    fn test_missing_directory_reported() {
        let mut loader = PackLoader::new()
            .with_core(false)
            .with_directory("/nonexistent/errata/packs");
        assert!(loader.load_all().is_empty());
        assert!(loader.validation_errors()[0].contains("Directory not readable"));
    }

    #[test]
    fn test_load_pack_errors() {
        let dir = TempDir::new().unwrap();
        let mut loader = PackLoader::new();

        assert!(loader.load_pack(&dir.path().join("missing.yaml")).is_none());
        assert!(loader.validation_errors()[0].starts_with("Pack file not found"));

        let txt = write(&dir, "pack.txt", YAML_PACK);
        assert!(loader.load_pack(&txt).is_none());
        assert!(loader.validation_errors()[1].contains("Unsupported pack format"));
    }

    #[test]
    fn test_pack_source_clears_errors_on_reload() {
        let mut loader = PackLoader::new()
            .with_core(false)
            .with_directory("/nonexistent/errata/packs");
        PackSource::load_all(&mut loader);
        PackSource::load_all(&mut loader);
        assert_eq!(PackSource::validation_errors(&loader).len(), 1);
    }

    #[test]
    fn test_default_includes_core() {
        let mut loader = PackLoader::default();
        let packs = loader.load_all();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].name(), "python-builtins");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(PackFormat::from_path(Path::new("a.YML")), Some(PackFormat::Yaml));
        assert_eq!(PackFormat::from_path(Path::new("a.toml")), Some(PackFormat::Toml));
        assert_eq!(PackFormat::from_path(Path::new("a.json")), None);
        assert_eq!(PackFormat::from_path(Path::new("noext")), None);
    }
}
