//! One line per diagnostic, for scripting

use super::OutputFormatter;
use crate::diagnostic::Diagnostic;
use crate::engine::LintResult;

pub struct CompactFormatter {
    pub show_severity: bool,
    pub show_rule: bool,
}

impl CompactFormatter {
    pub fn new() -> Self {
        Self {
            show_severity: true,
            show_rule: true,
        }
    }

    pub fn without_severity(mut self) -> Self {
        self.show_severity = false;
        self
    }

    pub fn without_rule(mut self) -> Self {
        self.show_rule = false;
        self
    }
}

impl Default for CompactFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for CompactFormatter {
    fn format(&self, result: &LintResult) -> String {
        result
            .diagnostics
            .iter()
            .map(|d| self.format_diagnostic(d) + "\n")
            .collect()
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let mut parts = vec![format!(
            "{}:{}:{}",
            diagnostic.location.file.display(),
            diagnostic.location.line,
            diagnostic.location.column
        )];
        if self.show_severity {
            parts.push(diagnostic.severity.to_string());
        }
        if self.show_rule {
            parts.push(diagnostic.rule_id.clone());
        }
        parts.push(diagnostic.message.clone());
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Severity;
    use crate::output::sample_diagnostic;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compact_format() {
        let diag = sample_diagnostic(Severity::Error, "LC001", 10, "Local method in query");
        assert_eq!(
            CompactFormatter::new().format_diagnostic(&diag),
            "Orders.cs:10:9: error: LC001: Local method in query"
        );
    }

    #[test]
    fn test_compact_minimal() {
        let diag = sample_diagnostic(Severity::Error, "LC001", 1, "Error");
        let formatter = CompactFormatter::new().without_severity().without_rule();
        assert_eq!(formatter.format_diagnostic(&diag), "Orders.cs:1:9: Error");
    }

    #[test]
    fn test_compact_result() {
        let result = LintResult {
            diagnostics: vec![
                sample_diagnostic(Severity::Error, "LC001", 1, "E1"),
                sample_diagnostic(Severity::Warning, "LC003", 2, "E2"),
            ],
            files_processed: 1,
            ..Default::default()
        };
        let output = CompactFormatter::new().format(&result);
        assert_eq!(output.lines().count(), 2);
    }
}
