//! errata - rule-based explanations for Python exceptions
//!
//! This library provides the explanation engine behind the `errata` CLI:
//! context analysis, rule matching, template rendering and pack loading.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod facts;
pub mod loader;
pub mod matcher;
pub mod output;
pub mod pack;
pub mod template;
pub mod traceback;

// Re-export commonly used types
pub use cli::{Cli, Command};
pub use config::Config;
pub use context::{ExceptionContext, TracebackFrame};
pub use engine::{Engine, EngineStatistics, PackSource, SharedEngine};
pub use error::PackError;
pub use facts::{FactSet, FactValue};
pub use loader::PackLoader;
pub use pack::{ContextPredicate, Rule, RulePack};
pub use template::RenderedExplanation;
