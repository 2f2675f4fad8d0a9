//! Human-readable text output

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, Severity};
use crate::engine::LintResult;
use colored::*;
use std::collections::BTreeMap;

/// Text formatter with optional color support
pub struct TextFormatter {
    pub colored: bool,

    /// Show the offending source line with a caret underline
    pub show_source: bool,

    pub show_help: bool,

    /// Show the rewrite a rule offers
    pub show_fixes: bool,

    /// Trailing "N files processed" summary
    pub show_stats: bool,

    /// Show context lines before/after
    pub show_context: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            show_source: true,
            show_help: true,
            show_fixes: true,
            show_stats: true,
            show_context: true,
        }
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.colored {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn severity_str(&self, severity: Severity) -> String {
        let s = severity.to_string();
        match severity {
            Severity::Error => self.paint(&s, |t| t.red().bold()),
            Severity::Warning => self.paint(&s, |t| t.yellow().bold()),
            Severity::Info => self.paint(&s, |t| t.blue()),
        }
    }

    fn gutter(&self) -> String {
        self.paint("|", |t| t.blue())
    }

    fn context_line(&self, line_num: usize, line: &str) -> String {
        format!(
            "{} {} {}\n",
            self.paint(&format!("{:>4}", line_num), |t| t.dimmed()),
            self.gutter(),
            self.paint(line, |t| t.dimmed())
        )
    }

    fn count(&self, n: usize, singular: &str, plural: &str, style: fn(&str) -> ColoredString) -> Option<String> {
        (n > 0).then(|| self.paint(&format!("{} {}", n, if n == 1 { singular } else { plural }), style))
    }

    fn format_stats(&self, result: &LintResult) -> String {
        let mut output = format!(
            "\n{} {} processed",
            result.files_processed,
            if result.files_processed == 1 { "file" } else { "files" }
        );
        let counts: Vec<String> = [
            self.count(result.error_count, "error", "errors", |t| t.red()),
            self.count(result.warning_count, "warning", "warnings", |t| t.yellow()),
            self.count(result.info_count, "info", "infos", |t| t.blue()),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !counts.is_empty() {
            output.push_str(&format!(": {}", counts.join(", ")));
        }
        output.push('\n');
        output.push_str(&format!("Finished in {:.2}s\n", result.duration.as_secs_f64()));
        output
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, result: &LintResult) -> String {
        let mut output = String::new();

        let mut by_file: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for diag in &result.diagnostics {
            by_file.entry(&diag.location.file).or_default().push(diag);
        }

        for (file, diagnostics) in &by_file {
            output.push_str(&self.paint(&file.display().to_string(), |t| t.underline()));
            output.push('\n');
            for diag in diagnostics {
                output.push_str(&self.format_diagnostic(diag));
                output.push('\n');
            }
            output.push('\n');
        }

        if self.show_stats {
            output.push_str(&self.format_stats(result));
        }
        output
    }

    fn format_diagnostic(&self, diag: &Diagnostic) -> String {
        let mut output = format!(
            "{}:{}:{}: {}[{}]: {}\n",
            diag.location.file.display(),
            diag.location.line,
            diag.location.column,
            self.severity_str(diag.severity),
            self.paint(&diag.rule_id, |t| t.cyan()),
            diag.message
        );

        if self.show_source {
            if let Some(source) = &diag.source_line {
                output.push_str(&format!("   {}\n", self.gutter()));
                if self.show_context {
                    for (line_num, line) in &diag.context_before {
                        output.push_str(&self.context_line(*line_num, line));
                    }
                }
                output.push_str(&format!(
                    "{} {} {}\n",
                    self.paint(&format!("{:>4}", diag.location.line), |t| t.blue()),
                    self.gutter(),
                    source
                ));
                if diag.location.column > 0 {
                    let padding = " ".repeat(diag.location.column - 1);
                    let underline = "^".repeat(diag.location.length.max(1));
                    output.push_str(&format!(
                        "   {} {}{}\n",
                        self.gutter(),
                        padding,
                        self.paint(&underline, |t| t.red())
                    ));
                }
                if self.show_context {
                    for (line_num, line) in &diag.context_after {
                        output.push_str(&self.context_line(*line_num, line));
                    }
                }
            }
        }

        if self.show_help {
            if let Some(help) = &diag.help {
                output.push_str(&format!("   {} help: {}\n", self.paint("=", |t| t.blue()), help));
            }
        }

        if self.show_fixes {
            if let Some(fix) = &diag.fix {
                output.push_str(&format!(
                    "   {} fix ({}): {}",
                    self.paint("=", |t| t.green()),
                    fix.safety,
                    fix.description
                ));
                if let Some(replacement) = &fix.replacement {
                    output.push_str(&format!(" -> {}", self.paint(replacement, |t| t.green())));
                }
                output.push('\n');
            }
        }

        for note in &diag.notes {
            output.push_str(&format!("   {} note: {}\n", self.paint("=", |t| t.blue()), note));
        }

        output
    }
}
