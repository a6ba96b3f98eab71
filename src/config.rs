//! Configuration system for `errata`.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Where packs come from
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PacksConfig {
    /// Directories scanned for `.yaml`, `.yml` and `.toml` packs, in order
    pub directories: Vec<PathBuf>,
    /// Load the built-in Python builtins pack first
    pub include_core: bool,
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            directories: default_pack_dir().into_iter().collect(),
            include_core: true,
        }
    }
}

/// How explanations are shown
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub max_suggestions: usize,
    pub max_examples: usize,
    /// Show which pack an explanation came from
    pub show_pack_info: bool,
    pub color: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_suggestions: 5,
            max_examples: 3,
            show_pack_info: false,
            color: true,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub packs: PacksConfig,
    pub display: DisplayConfig,
}

impl Config {
    /// Load config from file, returning default config if file doesn't exist
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load config from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path).map(|contents| toml::from_str(&contents)) {
            Ok(Ok(config)) => config,
            Ok(Err(err)) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "ignoring invalid config file"
                );
                Self::default()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot read config file");
                Self::default()
            }
        }
    }

    /// Get the config file path (~/.config/errata/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("errata").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let enabled = |key: &str| var(key).map(|v| v == "1").unwrap_or(false);

        // ERRATA_PACKS_DIR=/path is searched before configured directories
        if let Some(dir) = var("ERRATA_PACKS_DIR").filter(|d| !d.is_empty()) {
            self.packs.directories.insert(0, PathBuf::from(dir));
        }

        if enabled("ERRATA_NO_COLOR") {
            self.display.color = false;
        }

        if enabled("ERRATA_NO_CORE") {
            self.packs.include_core = false;
        }
    }
}

/// Default user pack directory (~/.errata/packs)
pub fn default_pack_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".errata").join("packs"))
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# errata - Python exception explainer configuration
# Place this file at ~/.config/errata/config.toml

[packs]
# Directories searched for explanation packs (*.yaml, *.yml, *.toml)
directories = ["~/.errata/packs"]

# Load the built-in pack for Python builtin exceptions (default: true)
include_core = true

[display]
# Maximum number of suggestions shown per explanation
max_suggestions = 5

# Maximum number of code examples shown per explanation
max_examples = 3

# Show the pack name and version under each explanation
show_pack_info = false

# Colored terminal output
color = true

# Environment variable overrides:
# ERRATA_PACKS_DIR=/path - Search this directory first
# ERRATA_NO_COLOR=1      - Disable colored output
# ERRATA_NO_CORE=1       - Skip the built-in pack
# ERRATA_LOG=debug       - Log filter (tracing EnvFilter syntax)
"#
    .to_string()
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}

/// Print the default config to stdout
pub fn print_default_config() {
    print!("{}", generate_default_config());
}
