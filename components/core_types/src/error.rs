//! Diagnostics and fatal errors.
//!
//! Runtime and load-time problems are accumulated on an [`ErrorReporter`]
//! as [`Diagnostic`] records; fatal unwinding adds one `trace` entry per
//! caller frame so the reporter ends up holding a full call stack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a diagnostic record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The originating error.
    Err,
    /// A "called from here" stack entry.
    Trace,
    /// Supplementary information.
    Note,
}

/// One diagnostic record with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Record kind.
    pub kind: DiagnosticKind,
    /// Human-readable message.
    pub message: String,
    /// Path of the module the position refers to.
    pub source_path: String,
    /// Byte offset into the module source.
    pub byte_offset: u32,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DiagnosticKind::Err => "error",
            DiagnosticKind::Trace => "trace",
            DiagnosticKind::Note => "note",
        };
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.source_path, self.line, self.column, kind, self.message
        )
    }
}

/// Accumulates diagnostics for one VM.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReporter {
    /// An empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Whether any `err`-kind diagnostic was recorded.
    pub fn had_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Err)
    }

    /// Everything recorded so far, in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Drop all recorded diagnostics.
    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }

    /// Render the plain-text report, one diagnostic per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            out.push_str(&d.to_string());
            out.push('\n');
        }
        out
    }
}

/// Non-recoverable execution failure. The full story lives on the
/// reporter; this carries the originating message for callers that only
/// need the headline.
#[derive(Debug, Clone, PartialEq)]
pub struct FatalError {
    /// The originating error message.
    pub message: String,
}

impl FatalError {
    /// Build a fatal error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FatalError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(kind: DiagnosticKind, message: &str) -> Diagnostic {
        Diagnostic {
            kind,
            message: message.to_string(),
            source_path: "demo.tern".to_string(),
            byte_offset: 4,
            line: 1,
            column: 5,
        }
    }

    #[test]
    fn test_reporter_orders_and_flags_errors() {
        let mut reporter = ErrorReporter::new();
        assert!(!reporter.had_errors());

        reporter.report(diag(DiagnosticKind::Err, "division by zero"));
        reporter.report(diag(DiagnosticKind::Trace, "called from here"));

        assert!(reporter.had_errors());
        assert_eq!(reporter.diagnostics().len(), 2);
        assert_eq!(reporter.diagnostics()[1].kind, DiagnosticKind::Trace);
    }

    #[test]
    fn test_render_format() {
        let mut reporter = ErrorReporter::new();
        reporter.report(diag(DiagnosticKind::Err, "boom"));
        assert_eq!(reporter.render(), "demo.tern:1:5: error: boom\n");
    }

    #[test]
    fn test_diagnostic_serializes() {
        let d = diag(DiagnosticKind::Err, "boom");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"err\""));
        assert!(json.contains("\"byte_offset\":4"));
    }
}
