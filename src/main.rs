use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io::{self, BufRead, IsTerminal};
use tracing_subscriber::EnvFilter;

use errata::cli::{Cli, Command, ExplainArgs};
use errata::config::{print_default_config, Config};
use errata::context::ExceptionContext;
use errata::engine::Engine;
use errata::loader::PackLoader;
use errata::output::{
    format_facts, print_colored, print_debug_section, print_no_explanation, print_pack_info,
    print_pack_list, print_statistics,
};
use errata::pack::RulePack;
use errata::traceback;

fn format_error(message: &str, tip: Option<&str>) -> String {
    let mut output = format!("{} {}", "Error:".red().bold(), message);
    if let Some(tip) = tip {
        output.push('\n');
        output.push_str(&format!("{} {}", "Tip:".blue().bold(), tip));
    }
    output
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("ERRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "errata", &mut io::stdout());
}

fn get_input(args: &ExplainArgs) -> Result<String> {
    // If input args provided, use them
    if !args.input.is_empty() {
        return Ok(args.input.join(" "));
    }

    // Otherwise read from stdin if piped
    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut input = String::new();
        for line in stdin.lock().lines() {
            input.push_str(&line?);
            input.push('\n');
        }
        let trimmed = input.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }

    bail!(format_error(
        "No input provided. Usage: errata <traceback>",
        Some(&"Pipe a crashed script's stderr: python app.py 2>&1 | errata".dimmed().to_string()),
    ))
}

fn build_context(args: &ExplainArgs) -> Result<ExceptionContext> {
    let ctx = if let Some(path) = &args.context {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid exception context in {}", path.display()))?
    } else if let (Some(kind), Some(message)) = (&args.exception_type, &args.message) {
        ExceptionContext::new(kind.as_str(), message.as_str())
    } else {
        let input = get_input(args)?;
        let parsed = traceback::can_parse(&input)
            .then(|| traceback::parse(&input))
            .flatten();
        match parsed {
            Some(ctx) => ctx,
            None => bail!(format_error(
                "No Python exception found in the input.",
                Some("Expected a traceback or a line like: NameError: name 'x' is not defined"),
            )),
        }
    };

    Ok(ctx.local_names(args.locals.iter().cloned()))
}

fn explain(engine: &mut Engine, cli: &Cli, config: &Config) -> Result<()> {
    let args = cli.explain_args();
    let ctx = build_context(args)?;

    if args.debug {
        print_debug_section("Context", &serde_json::to_string_pretty(&ctx)?, None);
        let facts = engine.analyze(&ctx);
        print_debug_section(
            "Facts",
            &format_facts(&facts),
            Some(format!("({} facts)", facts.len())),
        );
    }

    if args.all {
        let results = engine.explain_all(&ctx);
        if cli.json {
            let payload = serde_json::json!({
                "exception": ctx.headline(),
                "explanations": results,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else if results.is_empty() {
            print_no_explanation(&ctx);
        } else {
            for result in &results {
                print_colored(result, &ctx, &config.display);
            }
        }
        return Ok(());
    }

    let result = engine.explain(&ctx);
    if cli.json {
        let payload = serde_json::json!({
            "exception": ctx.headline(),
            "explanation": result,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    match result {
        Some(result) => print_colored(&result, &ctx, &config.display),
        None => print_no_explanation(&ctx),
    }
    Ok(())
}

fn list_packs(engine: &Engine, cli: &Cli, detailed: bool, by_type: Option<&str>) -> Result<()> {
    let packs: Vec<&RulePack> = match by_type {
        Some(kind) => engine.packs_for_exception_type(kind),
        None => engine.packs().collect(),
    };

    if cli.json {
        let metadata: Vec<_> = packs.iter().map(|p| &p.metadata).collect();
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        print_pack_list(&packs, detailed);
    }
    Ok(())
}

fn show_pack_info(engine: &Engine, cli: &Cli, name: &str) -> Result<()> {
    let Some(pack) = engine.pack(name) else {
        bail!(format_error(
            &format!("No loaded pack named '{name}'."),
            Some("Run `errata list` to see loaded packs"),
        ));
    };

    if cli.json {
        let rules: Vec<_> = pack
            .rules
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "priority": r.priority,
                    "exception_type": r.conditions.exception_type,
                })
            })
            .collect();
        let payload = serde_json::json!({
            "metadata": pack.metadata,
            "source": pack.source,
            "rules": rules,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_pack_info(pack);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load();
    config.apply_env_overrides();
    for dir in cli.pack_dir.iter().rev() {
        config.packs.directories.insert(0, dir.clone());
    }
    if cli.no_core {
        config.packs.include_core = false;
    }
    if !config.display.color {
        colored::control::set_override(false);
    }

    match &cli.command {
        Some(Command::Completions { shell }) => {
            print_completions(*shell);
            return Ok(());
        }
        Some(Command::Config) => {
            print_default_config();
            return Ok(());
        }
        _ => {}
    }

    let mut engine = Engine::new(PackLoader::from_config(&config));
    engine.load();

    match &cli.command {
        Some(Command::List { detailed, by_type }) => {
            list_packs(&engine, &cli, *detailed, by_type.as_deref())
        }
        Some(Command::Info { name }) => show_pack_info(&engine, &cli, name),
        Some(Command::Stats) => {
            let stats = engine.statistics();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_statistics(&stats);
            }
            Ok(())
        }
        _ => explain(&mut engine, &cli, &config),
    }
}
