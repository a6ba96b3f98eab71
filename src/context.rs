//! Exception context captured at the failure site.
//!
//! This is what an interception layer hands the engine: the exception's
//! type and message, the traceback frames, the local variable names visible
//! in the deepest frame, and optionally a window of surrounding source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Function name reported for code running at module level
pub const MODULE_LEVEL: &str = "module";

/// A single traceback frame, outermost first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracebackFrame {
    pub filename: String,
    pub line_number: u32,
    pub function_name: String,
    /// The source line executing in this frame, if known
    #[serde(default)]
    pub source_line: Option<String>,
}

impl TracebackFrame {
    pub fn new(
        filename: impl Into<String>,
        line_number: u32,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            line_number,
            function_name: function_name.into(),
            source_line: None,
        }
    }

    /// Builder: set the source line
    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.source_line = Some(line.into());
        self
    }

    /// Whether this frame runs at module level rather than inside a function
    pub fn is_module_level(&self) -> bool {
        self.function_name == MODULE_LEVEL || self.function_name == "<module>"
    }
}

/// One line of source surrounding the failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLine {
    pub line_number: u32,
    pub text: String,
    #[serde(default)]
    pub is_error_line: bool,
}

/// Everything known about one exception occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExceptionContext {
    /// Exception type name, e.g. `NameError`
    pub exception_type: String,

    /// Exception message as the runtime printed it
    pub exception_message: String,

    /// Traceback frames, outermost first; the last one is where it failed
    #[serde(default)]
    pub frames: Vec<TracebackFrame>,

    /// Local variables at the deepest frame, name to printable value
    #[serde(default)]
    pub local_variables: BTreeMap<String, String>,

    /// Source lines around the failing line
    #[serde(default)]
    pub source_context: Vec<SourceLine>,
}

impl ExceptionContext {
    /// Create a context with just an exception type and message
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            exception_message: message.into(),
            ..Default::default()
        }
    }

    /// Builder: append a traceback frame
    pub fn frame(mut self, frame: TracebackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Builder: add a local variable
    pub fn local(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.local_variables.insert(name.into(), value.into());
        self
    }

    /// Builder: add local variable names whose values are not known
    pub fn local_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.local_variables
                .entry(name.into())
                .or_insert_with(|| "<unknown>".to_string());
        }
        self
    }

    /// Builder: append a source line
    pub fn source_line(
        mut self,
        line_number: u32,
        text: impl Into<String>,
        is_error_line: bool,
    ) -> Self {
        self.source_context.push(SourceLine {
            line_number,
            text: text.into(),
            is_error_line,
        });
        self
    }

    /// The frame where the exception was raised
    pub fn deepest_frame(&self) -> Option<&TracebackFrame> {
        self.frames.last()
    }

    /// The line marked as failing in the source window, if any
    pub fn error_line(&self) -> Option<&SourceLine> {
        self.source_context.iter().find(|l| l.is_error_line)
    }

    /// Source text of the failing line: the marked line of the source window,
    /// else the deepest frame's own source line
    pub fn failing_source(&self) -> Option<&str> {
        self.error_line()
            .map(|l| l.text.as_str())
            .or_else(|| self.deepest_frame()?.source_line.as_deref())
    }

    /// Check if context has anything to explain
    pub fn is_empty(&self) -> bool {
        self.exception_type.is_empty() && self.exception_message.is_empty()
    }

    /// One-line summary in the runtime's own format, e.g. `NameError: name 'x' is not defined`
    pub fn headline(&self) -> String {
        if self.exception_message.is_empty() {
            self.exception_type.clone()
        } else {
            format!("{}: {}", self.exception_type, self.exception_message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_new() {
        let ctx = ExceptionContext::default();
        assert!(ctx.is_empty());
        assert!(ctx.deepest_frame().is_none());
    }

    #[test]
    fn test_context_builder() {
        let ctx = ExceptionContext::new("NameError", "name 'x' is not defined")
            .frame(TracebackFrame::new("main.py", 3, "<module>"))
            .frame(TracebackFrame::new("lib.py", 10, "helper").with_source_line("print(x)"))
            .local("items", "[1, 2]")
            .local_names(["count"])
            .source_line(10, "print(x)", true);

        assert_eq!(ctx.frames.len(), 2);
        let deepest = ctx.deepest_frame().unwrap();
        assert_eq!(deepest.function_name, "helper");
        assert_eq!(deepest.source_line.as_deref(), Some("print(x)"));
        assert_eq!(ctx.local_variables.get("items").map(String::as_str), Some("[1, 2]"));
        assert!(ctx.local_variables.contains_key("count"));
        assert_eq!(ctx.error_line().map(|l| l.line_number), Some(10));
    }

    #[test]
    fn test_failing_source_prefers_marked_line() {
        let frame_only = ExceptionContext::new("KeyError", "'k'")
            .frame(TracebackFrame::new("app.py", 4, "load").with_source_line("cfg['k']"));
        assert_eq!(frame_only.failing_source(), Some("cfg['k']"));

        let windowed = frame_only
            .source_line(3, "cfg = {}", false)
            .source_line(4, "value = cfg['k']", true);
        assert_eq!(windowed.failing_source(), Some("value = cfg['k']"));

        assert_eq!(ExceptionContext::new("KeyError", "'k'").failing_source(), None);
    }

    #[test]
    fn test_local_names_keep_known_values() {
        let ctx = ExceptionContext::new("NameError", "")
            .local("items", "[1]")
            .local_names(["items"]);
        assert_eq!(ctx.local_variables["items"], "[1]");
    }

    #[test]
    fn test_module_level_frames() {
        assert!(TracebackFrame::new("a.py", 1, "<module>").is_module_level());
        assert!(TracebackFrame::new("a.py", 1, "module").is_module_level());
        assert!(!TracebackFrame::new("a.py", 1, "main").is_module_level());
    }

    #[test]
    fn test_headline() {
        let ctx = ExceptionContext::new("KeyError", "'missing'");
        assert_eq!(ctx.headline(), "KeyError: 'missing'");
        assert_eq!(ExceptionContext::new("StopIteration", "").headline(), "StopIteration");
    }

    #[test]
    fn test_context_deserializes_from_json() {
        let ctx: ExceptionContext = serde_json::from_str(
            r#"{
                "exception_type": "NameError",
                "exception_message": "name 'lst' is not defined",
                "frames": [{"filename": "app.py", "line_number": 4, "function_name": "run"}],
                "local_variables": {"lst2": "[]"}
            }"#,
        )
        .unwrap();
        assert_eq!(ctx.frames[0].function_name, "run");
        assert!(ctx.source_context.is_empty());
    }
}
