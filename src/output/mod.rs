//! Output formatters for lint results

mod compact;
mod github;
mod json;
mod text;

pub use compact::CompactFormatter;
pub use github::GithubFormatter;
pub use json::JsonFormatter;
pub use text::TextFormatter;

use crate::config::OutputFormat;
use crate::diagnostic::Diagnostic;
use crate::engine::LintResult;

/// Renders lint results for one kind of consumer
pub trait OutputFormatter: Send + Sync {
    /// Format the whole run, summary included
    fn format(&self, result: &LintResult) -> String;

    /// Format a single diagnostic
    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String;
}

/// Formatter for `format`; `colored` only affects text output
pub fn formatter(format: OutputFormat, colored: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Text => {
            let text = TextFormatter::new();
            Box::new(if colored { text } else { text.without_color() })
        }
        OutputFormat::Json => Box::new(JsonFormatter::new().pretty()),
        OutputFormat::Compact => Box::new(CompactFormatter::new()),
        OutputFormat::Github => Box::new(GithubFormatter::new()),
    }
}

#[cfg(test)]
pub(crate) fn sample_diagnostic(
    severity: crate::diagnostic::Severity,
    rule: &str,
    line: usize,
    message: &str,
) -> Diagnostic {
    use crate::diagnostic::Location;
    Diagnostic::new(
        rule,
        severity,
        message,
        Location::new(std::path::PathBuf::from("Orders.cs"), line, 9).with_length(5),
    )
}
