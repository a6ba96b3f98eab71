//! Command-line interface definitions for `errata`.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Explain Python exceptions with rule-based explanation packs
#[derive(Parser, Debug)]
#[command(name = "errata", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(
    after_help = "EXAMPLES:\n    python app.py 2>&1 | errata\n    errata \"NameError: name 'pirnt' is not defined\"\n    errata --type NameError --message \"name 'lst' is not defined\" --locals list_of_items,lst2\n    errata list --by-type KeyError"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub explain: ExplainArgs,

    /// Output as JSON
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Log engine activity to stderr (same as ERRATA_LOG=debug)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Additional pack directory (can be repeated)
    #[arg(long, value_name = "DIR", global = true)]
    pub pack_dir: Vec<PathBuf>,

    /// Skip the built-in pack
    #[arg(long, global = true)]
    pub no_core: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExplainArgs {
    /// Traceback or `Type: message` line to explain (reads stdin if omitted)
    #[arg(trailing_var_arg = true)]
    pub input: Vec<String>,

    /// Exception type name, e.g. NameError
    #[arg(long = "type", short = 't', value_name = "TYPE", requires = "message")]
    pub exception_type: Option<String>,

    /// Exception message
    #[arg(long, short = 'm', value_name = "TEXT", requires = "exception_type")]
    pub message: Option<String>,

    /// Local variable names visible where the exception was raised
    #[arg(long, short = 'l', value_delimiter = ',', value_name = "NAMES")]
    pub locals: Vec<String>,

    /// Read the exception context from a JSON file
    #[arg(long, short = 'c', value_name = "PATH", conflicts_with_all = ["exception_type", "input"])]
    pub context: Option<PathBuf>,

    /// Show every matching explanation, not just the best one
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Show debug info (parsed context and analyzed facts)
    #[arg(long, short = 'd')]
    pub debug: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Explain an exception (the default)
    Explain(ExplainArgs),
    /// List loaded packs
    List {
        /// Show targets and source files
        #[arg(long)]
        detailed: bool,

        /// Only packs targeting this exception type
        #[arg(long, value_name = "TYPE")]
        by_type: Option<String>,
    },
    /// Show details about one pack
    Info {
        /// Pack name
        name: String,
    },
    /// Show engine statistics and pack validation errors
    Stats,
    /// Print the default configuration file
    Config,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// The explain arguments in effect, whether given directly or via `explain`
    pub fn explain_args(&self) -> &ExplainArgs {
        match &self.command {
            Some(Command::Explain(args)) => args,
            _ => &self.explain,
        }
    }
}
