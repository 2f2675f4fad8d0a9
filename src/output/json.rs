//! JSON output formatter

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, FixSafety, Severity};
use crate::engine::LintResult;
use serde::Serialize;

/// JSON formatter for machine-readable output
#[derive(Default)]
pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    diagnostics: Vec<JsonDiagnostic<'a>>,
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    rule_id: &'a str,
    severity: Severity,
    message: &'a str,
    file: String,
    line: usize,
    column: usize,
    length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_line: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fix: Option<JsonFix<'a>>,
}

#[derive(Serialize)]
struct JsonFix<'a> {
    description: &'a str,
    safety: FixSafety,
    #[serde(skip_serializing_if = "Option::is_none")]
    replacement: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonSummary {
    files_processed: usize,
    files_with_errors: usize,
    files_with_warnings: usize,
    error_count: usize,
    warning_count: usize,
    info_count: usize,
    duration_ms: u128,
}

impl<'a> From<&'a Diagnostic> for JsonDiagnostic<'a> {
    fn from(d: &'a Diagnostic) -> Self {
        Self {
            rule_id: &d.rule_id,
            severity: d.severity,
            message: &d.message,
            file: d.location.file.display().to_string(),
            line: d.location.line,
            column: d.location.column,
            length: d.location.length,
            source_line: d.source_line.as_deref(),
            help: d.help.as_deref(),
            fix: d.fix.as_ref().map(|f| JsonFix {
                description: &f.description,
                safety: f.safety,
                replacement: f.replacement.as_deref(),
            }),
        }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, result: &LintResult) -> String {
        self.render(&JsonOutput {
            diagnostics: result.diagnostics.iter().map(JsonDiagnostic::from).collect(),
            summary: JsonSummary {
                files_processed: result.files_processed,
                files_with_errors: result.files_with_errors,
                files_with_warnings: result.files_with_warnings,
                error_count: result.error_count,
                warning_count: result.warning_count,
                info_count: result.info_count,
                duration_ms: result.duration.as_millis(),
            },
        })
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        self.render(&JsonDiagnostic::from(diagnostic))
    }
}
