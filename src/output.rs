//! Terminal output formatting.

use colored::Colorize;
use std::path::Path;

use crate::config::DisplayConfig;
use crate::context::ExceptionContext;
use crate::engine::EngineStatistics;
use crate::facts::FactSet;
use crate::pack::RulePack;
use crate::template::{RenderedExample, RenderedExplanation};

/// Process inline markdown: `code`, **bold**, *italic*
///
/// Stars only count as emphasis when they close and wrap non-space text, so
/// operators such as `'*'` and `'**'` in messages stay intact.
pub fn render_inline_markdown(text: &str) -> String {
    let mut result = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '`' => {
                let code: String = std::iter::from_fn(|| chars.next_if(|&n| n != '`')).collect();
                chars.next_if_eq(&'`');
                result.push_str(&code.cyan().to_string());
            }
            '*' => {
                let delimiter = if chars.next_if_eq(&'*').is_some() { "**" } else { "*" };
                let rest: String = chars.clone().collect();
                match emphasized(&rest, delimiter) {
                    Some(inner) => {
                        let styled = if delimiter == "**" {
                            inner.bold()
                        } else {
                            inner.italic()
                        };
                        result.push_str(&styled.to_string());
                        for _ in 0..inner.chars().count() + delimiter.len() {
                            chars.next();
                        }
                    }
                    None => result.push_str(delimiter),
                }
            }
            _ => result.push(c),
        }
    }

    result
}

/// Text up to the closing `delimiter`, if it is non-empty and not padded
fn emphasized<'a>(rest: &'a str, delimiter: &str) -> Option<&'a str> {
    let end = rest.find(delimiter)?;
    let inner = &rest[..end];
    let padded = inner.starts_with(char::is_whitespace) || inner.ends_with(char::is_whitespace);
    (!inner.is_empty() && !inner.contains('*') && !padded).then_some(inner)
}

fn print_wrapped(text: &str, width: usize, indent: &str) {
    for paragraph in text.lines() {
        let processed = render_inline_markdown(paragraph);
        for line in textwrap::wrap(&processed, width.saturating_sub(indent.len())) {
            println!("{indent}{line}");
        }
    }
}

/// Suggestions and examples after applying the display limits
pub fn visible_items<'a>(
    result: &'a RenderedExplanation,
    display: &DisplayConfig,
) -> (&'a [String], &'a [RenderedExample]) {
    let suggestions = &result.suggestions[..result.suggestions.len().min(display.max_suggestions)];
    let examples = &result.examples[..result.examples.len().min(display.max_examples)];
    (suggestions, examples)
}

pub fn print_colored(
    result: &RenderedExplanation,
    ctx: &ExceptionContext,
    display: &DisplayConfig,
) {
    let width = textwrap::termwidth().min(100);

    println!();
    println!("{} {}", "●".red(), ctx.headline().bold());
    if let Some(frame) = ctx.deepest_frame() {
        println!(
            "  {} {} in {}",
            "at".dimmed(),
            format_file_line(Path::new(&frame.filename), Some(frame.line_number)),
            frame.function_name.bright_white()
        );
    }
    if let Some(source) = ctx.failing_source() {
        println!("    {}", source.trim().bright_white());
    }
    println!();

    let title = render_inline_markdown(&result.title);
    for line in textwrap::wrap(&title, width) {
        println!("{}", line.white().bold());
    }
    println!();

    if !result.explanation.is_empty() {
        println!("{} {}", "▸".blue(), "Explanation".blue().bold());
        print_wrapped(&result.explanation, width, "  ");
        println!();
    }

    let (suggestions, examples) = visible_items(result, display);

    if !suggestions.is_empty() {
        println!("{} {}", "▸".green(), "Suggestions".green().bold());
        for (i, suggestion) in suggestions.iter().enumerate() {
            let processed = render_inline_markdown(suggestion);
            let lines = textwrap::wrap(&processed, width.saturating_sub(5));
            for (j, line) in lines.iter().enumerate() {
                if j == 0 {
                    println!("  {} {line}", format!("{}.", i + 1).green());
                } else {
                    println!("     {line}");
                }
            }
        }
        println!();
    }

    if !examples.is_empty() {
        println!("{} {}", "▸".cyan(), "Examples".cyan().bold());
        for example in examples {
            print_wrapped(&example.description, width, "  ");
            for code_line in example.code.lines() {
                println!("    {}", code_line.cyan());
            }
            println!();
        }
    }

    if display.show_pack_info {
        if let Some(pack) = &result.metadata.pack_name {
            let version = result.metadata.pack_version.as_deref().unwrap_or("?");
            println!(
                "{}",
                format!("  from {pack} v{version} ({})", result.metadata.explanation_id).dimmed()
            );
            println!();
        }
    }
}

/// Shown when no rule matched
pub fn print_no_explanation(ctx: &ExceptionContext) {
    println!();
    println!("{} {}", "●".red(), ctx.headline().bold());
    println!();
    println!(
        "{}",
        format!("No explanation available for {}.", ctx.exception_type).dimmed()
    );
    println!(
        "{} {}",
        "Tip:".blue().bold(),
        "Add a pack covering this exception to ~/.errata/packs".dimmed()
    );
    println!();
}

/// Truncate to `max` characters, marking the cut with `...`
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

pub fn print_pack_list(packs: &[&RulePack], detailed: bool) {
    println!();
    println!("{} {}", "▸".cyan(), "Loaded Packs".cyan().bold());

    if packs.is_empty() {
        println!("  {}", "No packs loaded.".dimmed());
        println!();
        return;
    }

    println!(
        "  {:24} {:10} {:>6}  {}",
        "Name".dimmed(),
        "Version".dimmed(),
        "Rules".dimmed(),
        "Description".dimmed()
    );
    println!("  {}", "─".repeat(85).dimmed());

    for pack in packs {
        let meta = &pack.metadata;
        println!(
            "  {:24} {:10} {:>6}  {}",
            truncate(&meta.name, 24).green(),
            truncate(&meta.version, 10),
            pack.rules.len(),
            truncate(&meta.description, 40)
        );
        if detailed {
            println!(
                "  {:24} {} {}",
                "",
                "targets:".blue(),
                meta.targets.join(", ").bright_white()
            );
            if let Some(source) = &pack.source {
                println!("  {:24} {} {}", "", "source:".blue(), source.display());
            }
        }
    }
    println!();
}

pub fn print_pack_info(pack: &RulePack) {
    let meta = &pack.metadata;
    let field = |label: &str, value: &str| {
        println!("  {} {}", format!("{label}:").blue().bold(), value.bright_white());
    };

    println!();
    println!("{} {}", "▸".cyan(), meta.name.cyan().bold());
    field("Version", &meta.version);
    field("Description", &meta.description);
    field("Author", &meta.author);
    field("License", &meta.license);
    field("Engine", &format!(">= {}", meta.min_engine_version));
    field("Targets", &meta.targets.join(", "));
    if !meta.tags.is_empty() {
        field("Tags", &meta.tags.join(", "));
    }
    if let Some(homepage) = &meta.homepage {
        field("Homepage", homepage);
    }
    if let Some(repository) = &meta.repository {
        field("Repository", repository);
    }
    if let Some(source) = &pack.source {
        field("Source", &source.display().to_string());
    }
    println!();

    println!("  {} ({})", "Rules".blue().bold(), pack.rules.len());
    for rule in &pack.rules {
        println!(
            "    {:>4}  {:28} {}",
            rule.priority.to_string().yellow(),
            rule.id,
            rule.conditions.exception_type.dimmed()
        );
    }
    println!();
}

pub fn print_statistics(stats: &EngineStatistics) {
    println!("{} {}", "▸".magenta(), "Statistics".magenta().bold());
    println!(
        "  {} {}",
        "Packs:".blue().bold(),
        stats.loaded_packs.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Rules:".blue().bold(),
        stats.total_rules.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Exceptions:".blue().bold(),
        if stats.exception_types_covered.is_empty() {
            "none".dimmed().to_string()
        } else {
            stats.exception_types_covered.join(", ").bright_white().to_string()
        }
    );
    if !stats.validation_errors.is_empty() {
        println!("  {}", "Validation errors:".yellow().bold());
        for error in &stats.validation_errors {
            println!("    {} {}", "-".yellow(), error);
        }
    }
    println!();
}

pub fn print_debug_section(title: &str, body: &str, footer: Option<String>) {
    eprintln!("{}", format!("=== DEBUG: {title} ===").yellow().bold());
    if body.trim().is_empty() {
        eprintln!("{}", "| <empty>".dimmed());
    } else {
        for line in body.lines() {
            eprintln!("{}", format!("| {line}").bright_white());
        }
    }
    if let Some(footer) = footer {
        eprintln!("{}", footer.dimmed());
    }
    eprintln!();
}

/// One `name = value` line per fact, in name order
pub fn format_facts(facts: &FactSet) -> String {
    facts
        .iter()
        .map(|(name, value)| format!("{name} = {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a file:line location with color highlighting for terminal output
pub fn format_file_line(file: &Path, line: Option<u32>) -> String {
    let mut result = file.display().to_string().cyan().to_string();
    if let Some(l) = line {
        result.push_str(&format!(":{}", l.to_string().yellow()));
    }
    result
}
