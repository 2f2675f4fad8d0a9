//! Diagnostic types produced by rule callbacks

use crate::tree::{NodeId, Span};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Severity level for diagnostics
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational hint
    Info,
    /// Likely performance or reliability problem
    #[default]
    Warning,
    /// Definite problem
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "hint" | "note" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// How safe it is to apply a rule's rewrite without review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixSafety {
    /// Keeps the program's meaning; applied by default
    #[default]
    Safe,
    /// May change runtime behavior; applied only on request
    Unsafe,
    /// Shown to the user, never applied
    Display,
}

impl std::fmt::Display for FixSafety {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixSafety::Safe => write!(f, "safe"),
            FixSafety::Unsafe => write!(f, "unsafe"),
            FixSafety::Display => write!(f, "display"),
        }
    }
}

/// Source location of a diagnostic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Unit file path
    pub file: PathBuf,
    /// Line number (1-based, 0 when unknown)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
    /// Length of the highlighted region
    pub length: usize,
    /// Byte span in the rendered source
    #[serde(default)]
    pub span: Span,
}

impl Location {
    pub fn new(file: PathBuf, line: usize, column: usize) -> Self {
        Self {
            file,
            line,
            column,
            length: 0,
            span: Span::default(),
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// Short description of the rewrite a rule offers for a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixHint {
    /// Title of the rewrite
    pub description: String,
    /// Rendered replacement text of the primary edit, when there is one
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub safety: FixSafety,
}

impl FixHint {
    pub fn new(description: &str, safety: FixSafety) -> Self {
        Self {
            description: description.to_string(),
            replacement: None,
            safety,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safety == FixSafety::Safe
    }
}

/// A finding reported by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable rule identifier, e.g. `LC003`
    pub rule_id: String,
    pub severity: Severity,
    /// Message with positional arguments already substituted
    pub message: String,
    /// Positional message arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Primary location
    pub location: Location,
    #[serde(default)]
    pub secondary_locations: Vec<Location>,
    /// Node the diagnostic was reported on, used to compute its rewrite
    #[serde(default)]
    pub node: Option<NodeId>,
    /// The source line (for display)
    #[serde(default)]
    pub source_line: Option<String>,
    #[serde(default)]
    pub context_before: Vec<(usize, String)>,
    #[serde(default)]
    pub context_after: Vec<(usize, String)>,
    /// Help text (usually the rule description)
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub fix: Option<FixHint>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(rule_id: &str, severity: Severity, message: &str, location: Location) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            message: message.to_string(),
            args: Vec::new(),
            location,
            secondary_locations: Vec::new(),
            node: None,
            source_line: None,
            context_before: Vec::new(),
            context_after: Vec::new(),
            help: None,
            fix: None,
            notes: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_secondary(mut self, location: Location) -> Self {
        self.secondary_locations.push(location);
        self
    }

    pub fn with_source_line(mut self, line: &str) -> Self {
        self.source_line = Some(line.to_string());
        self
    }

    /// Add context lines from source content
    pub fn with_context(mut self, source_lines: &[&str], context_count: usize) -> Self {
        if context_count == 0 || self.location.line == 0 {
            return self;
        }

        let line_num = self.location.line;

        let start = line_num.saturating_sub(context_count + 1);
        let end = line_num.saturating_sub(1);
        for (i, line) in source_lines
            .iter()
            .enumerate()
            .skip(start)
            .take(end.saturating_sub(start))
        {
            self.context_before.push((i + 1, line.to_string()));
        }

        let end = (line_num + context_count).min(source_lines.len());
        for (i, line) in source_lines
            .iter()
            .enumerate()
            .skip(line_num)
            .take(end.saturating_sub(line_num))
        {
            self.context_after.push((i + 1, line.to_string()));
        }

        self
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn with_fix(mut self, fix: FixHint) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.notes.push(note.to_string());
        self
    }

    pub fn has_fix(&self) -> bool {
        self.fix.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Substitute `{0}`, `{1}`, ... in a message template
pub fn format_message(template: &str, args: &[String]) -> String {
    let mut message = template.to_string();
    for (i, arg) in args.iter().enumerate() {
        message = message.replace(&format!("{{{}}}", i), arg);
    }
    message
}
