//! Python traceback parsing.
//!
//! Turns a traceback as printed to stderr into an [`ExceptionContext`], so
//! output piped from a crashed script can be explained without a live hook.
//! Parsing is best-effort: unrecognized lines are skipped.

use regex::Regex;
use std::sync::LazyLock;

use crate::context::{ExceptionContext, TracebackFrame};

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// `  File "path/to/file.py", line 42, in function_name`
static FILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File "([^"]+)", line (\d+)(?:, in (.+))?\s*$"#)
        .expect("built-in frame pattern is valid")
});

/// `KeyError: 'missing'`, `requests.exceptions.HTTPError: 404`, `KeyboardInterrupt`
static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Za-z_][\w]*\.)*([A-Z]\w*(?:Error|Exception|Warning|Interrupt|Exit|Iteration))(?::\s?(.*))?$",
    )
    .expect("built-in exception pattern is valid")
});

/// Whether the text looks like a Python traceback or exception line
pub fn can_parse(input: &str) -> bool {
    input.contains(TRACEBACK_HEADER)
        || input.lines().any(|l| FILE_LINE.is_match(l))
        || input.lines().any(|l| parse_exception_line(l.trim()).is_some())
}

/// Parse a traceback into an exception context.
///
/// Chained tracebacks (`During handling of the above exception...`) keep
/// only the last exception and its frames. Returns `None` when no exception
/// line can be found.
pub fn parse(input: &str) -> Option<ExceptionContext> {
    let mut frames: Vec<TracebackFrame> = Vec::new();
    let mut exception: Option<(String, String)> = None;
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if trimmed == TRACEBACK_HEADER {
            // a new traceback in a chain starts over
            frames.clear();
            exception = None;
            continue;
        }

        if let Some(mut frame) = parse_file_line(line) {
            if let Some(next) = lines.peek() {
                let next_trimmed = next.trim();
                if is_source_line(next_trimmed) {
                    frame.source_line = Some(next_trimmed.to_string());
                    lines.next();
                }
            }
            frames.push(frame);
            continue;
        }

        if let Some(found) = parse_exception_line(trimmed) {
            exception = Some(found);
        }
    }

    let (exception_type, message) = exception?;
    let mut ctx = ExceptionContext::new(exception_type, message);
    ctx.frames = frames;
    Some(ctx)
}

fn parse_file_line(line: &str) -> Option<TracebackFrame> {
    let caps = FILE_LINE.captures(line)?;
    let line_number = caps[2].parse().ok()?;
    let function = caps
        .get(3)
        .map(|m| m.as_str().trim())
        .filter(|f| !f.is_empty())
        .unwrap_or("<module>");
    Some(TracebackFrame::new(&caps[1], line_number, function))
}

/// Parse `Type: message` into its parts, stripping any module prefix from
/// the type name.
pub fn parse_exception_line(line: &str) -> Option<(String, String)> {
    let caps = EXCEPTION_LINE.captures(line)?;
    let message = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some((caps[1].to_string(), message.to_string()))
}

fn is_source_line(trimmed: &str) -> bool {
    !trimmed.is_empty()
        && !trimmed.starts_with("File \"")
        && !trimmed.starts_with("During handling of the above exception")
        && !trimmed.starts_with("The above exception was the direct cause")
        && !trimmed.chars().all(|c| matches!(c, '^' | '~' | ' '))
        && parse_exception_line(trimmed).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME_ERROR: &str = r#"Traceback (most recent call last):
  File "/home/user/app/main.py", line 12, in <module>
    main()
  File "/home/user/app/main.py", line 8, in main
    print(totl)
          ^^^^
NameError: name 'totl' is not defined. Did you mean: 'total'?"#;

    #[test]
    fn test_parse_name_error() {
        let ctx = parse(NAME_ERROR).unwrap();
        assert_eq!(ctx.exception_type, "NameError");
        assert_eq!(
            ctx.exception_message,
            "name 'totl' is not defined. Did you mean: 'total'?"
        );
        assert_eq!(ctx.frames.len(), 2);

        let deepest = ctx.deepest_frame().unwrap();
        assert_eq!(deepest.filename, "/home/user/app/main.py");
        assert_eq!(deepest.line_number, 8);
        assert_eq!(deepest.function_name, "main");
        assert_eq!(deepest.source_line.as_deref(), Some("print(totl)"));
        assert_eq!(ctx.frames[0].function_name, "<module>");
    }

    #[test]
    fn test_parse_qualified_exception_type() {
        let input = r#"Traceback (most recent call last):
  File "fetch.py", line 3, in <module>
    r.raise_for_status()
requests.exceptions.HTTPError: 404 Client Error"#;
        let ctx = parse(input).unwrap();
        assert_eq!(ctx.exception_type, "HTTPError");
        assert_eq!(ctx.exception_message, "404 Client Error");
    }

    #[test]
    fn test_parse_chained_keeps_last_exception() {
        let input = r#"Traceback (most recent call last):
  File "a.py", line 2, in <module>
    d["k"]
KeyError: 'k'

During handling of the above exception, another exception occurred:

Traceback (most recent call last):
  File "a.py", line 4, in <module>
    int("x")
ValueError: invalid literal for int() with base 10: 'x'"#;
        let ctx = parse(input).unwrap();
        assert_eq!(ctx.exception_type, "ValueError");
        assert_eq!(ctx.frames.len(), 1);
        assert_eq!(ctx.frames[0].line_number, 4);
    }

    #[test]
    fn test_parse_bare_exception_line() {
        let ctx = parse("ZeroDivisionError: division by zero").unwrap();
        assert_eq!(ctx.exception_type, "ZeroDivisionError");
        assert_eq!(ctx.exception_message, "division by zero");
        assert!(ctx.frames.is_empty());
    }

    #[test]
    fn test_parse_exception_without_message() {
        let (kind, message) = parse_exception_line("KeyboardInterrupt").unwrap();
        assert_eq!(kind, "KeyboardInterrupt");
        assert!(message.is_empty());
    }

    #[test]
    fn test_non_exception_text() {
        assert!(parse("everything is fine").is_none());
        assert!(parse_exception_line("error: lowercase is not a python type").is_none());
        assert!(!can_parse("just some words"));
        assert!(can_parse(NAME_ERROR));
    }

    #[test]
    fn test_frame_without_function() {
        let frame = parse_file_line(r#"  File "<stdin>", line 1"#).unwrap();
        assert_eq!(frame.filename, "<stdin>");
        assert_eq!(frame.function_name, "<module>");
    }
}
