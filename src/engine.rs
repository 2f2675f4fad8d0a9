//! Core linter engine

use crate::config::Config;
use crate::diagnostic::{Diagnostic, FixHint, Location, Severity};
use crate::document::Unit;
use crate::registry::Registry;
use crate::rewrite::{self, Edit};
use crate::rule::{Rule, RuleContext};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Per-rule timing statistics
#[derive(Debug, Clone, Default)]
pub struct RuleTiming {
    pub rule_id: String,
    /// Total time spent on this rule
    pub total_time: Duration,
    /// Number of nodes the rule was called on
    pub evaluation_count: usize,
    /// Number of diagnostics produced
    pub match_count: usize,
}

impl RuleTiming {
    pub fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            ..Default::default()
        }
    }

    /// Average time per evaluation
    pub fn avg_time(&self) -> Duration {
        if self.evaluation_count > 0 {
            self.total_time / self.evaluation_count as u32
        } else {
            Duration::ZERO
        }
    }
}

/// Result of linting operation
#[derive(Debug, Default)]
pub struct LintResult {
    pub diagnostics: Vec<Diagnostic>,

    pub files_processed: usize,

    pub files_with_errors: usize,

    pub files_with_warnings: usize,

    pub error_count: usize,

    pub warning_count: usize,

    pub info_count: usize,

    /// Processing duration
    pub duration: Duration,

    /// Per-rule timing statistics (rule_id -> timing)
    pub rule_timings: HashMap<String, RuleTiming>,
}

impl LintResult {
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.warning_count > 0
    }

    /// No errors or warnings
    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.warning_count == 0
    }

    /// Get exit code (0 = success, 1 = warnings, 2 = errors)
    pub fn exit_code(&self) -> i32 {
        if self.error_count > 0 {
            2
        } else if self.warning_count > 0 {
            1
        } else {
            0
        }
    }

    fn count(&mut self, diagnostics: &[Diagnostic]) {
        for diag in diagnostics {
            match diag.severity {
                Severity::Error => self.error_count += 1,
                Severity::Warning => self.warning_count += 1,
                Severity::Info => self.info_count += 1,
            }
        }
        if self.error_count > 0 {
            self.files_with_errors = 1;
        }
        if self.warning_count > 0 {
            self.files_with_warnings = 1;
        }
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: LintResult) {
        self.diagnostics.extend(other.diagnostics);
        self.files_processed += other.files_processed;
        self.files_with_errors += other.files_with_errors;
        self.files_with_warnings += other.files_with_warnings;
        self.error_count += other.error_count;
        self.warning_count += other.warning_count;
        self.info_count += other.info_count;

        for (rule_id, timing) in other.rule_timings {
            let entry = self
                .rule_timings
                .entry(rule_id)
                .or_insert_with(|| RuleTiming::new(&timing.rule_id));
            entry.total_time += timing.total_time;
            entry.evaluation_count += timing.evaluation_count;
            entry.match_count += timing.match_count;
        }
    }

    /// Drop diagnostics below `min`, recounting
    pub fn retain_min_severity(&mut self, min: Severity) {
        self.diagnostics.retain(|d| d.severity >= min);
        self.error_count = 0;
        self.warning_count = 0;
        self.info_count = 0;
        let mut by_file: HashMap<PathBuf, (bool, bool)> = HashMap::new();
        for diag in &self.diagnostics {
            let entry = by_file.entry(diag.location.file.clone()).or_default();
            match diag.severity {
                Severity::Error => {
                    self.error_count += 1;
                    entry.0 = true;
                }
                Severity::Warning => {
                    self.warning_count += 1;
                    entry.1 = true;
                }
                Severity::Info => self.info_count += 1,
            }
        }
        self.files_with_errors = by_file.values().filter(|(e, _)| *e).count();
        self.files_with_warnings = by_file.values().filter(|(_, w)| *w).count();
    }

    /// Rule timings sorted by total time (descending)
    pub fn sorted_timings(&self) -> Vec<&RuleTiming> {
        let mut timings: Vec<_> = self.rule_timings.values().collect();
        timings.sort_by(|a, b| b.total_time.cmp(&a.total_time));
        timings
    }

    pub fn format_timings(&self) -> String {
        let mut output = String::new();
        let timings = self.sorted_timings();

        if timings.is_empty() {
            return "No timing data available".to_string();
        }

        output.push_str("Rule Timing Statistics:\n");
        output.push_str(&format!(
            "{:<12} {:>12} {:>12} {:>10} {:>12}\n",
            "Rule ID", "Total", "Avg", "Evals", "Matches"
        ));
        output.push_str(&"-".repeat(62));
        output.push('\n');

        for timing in timings {
            let total_ms = timing.total_time.as_secs_f64() * 1000.0;
            let avg_us = timing.avg_time().as_secs_f64() * 1_000_000.0;

            output.push_str(&format!(
                "{:<12} {:>10.2}ms {:>10.2}µs {:>10} {:>12}\n",
                timing.rule_id, total_ms, avg_us, timing.evaluation_count, timing.match_count
            ));
        }

        output
    }
}

/// The main linter engine
pub struct Engine {
    config: Config,

    registry: &'static Registry,

    /// Rules that pass the config selection, by registry index
    selected: Vec<bool>,

    /// Number of context lines to include
    context_lines: usize,

    /// Collect per-rule timing
    timing: bool,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let registry = Registry::global();
        let selected = registry.select(|meta| config.is_rule_active(meta));
        Self {
            config,
            registry,
            selected,
            context_lines: 0,
            timing: false,
        }
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_timing(mut self, timing: bool) -> Self {
        self.timing = timing;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &'static Registry {
        self.registry
    }

    /// Restrict the selection to one rule, regardless of config
    pub fn only_rule(mut self, id: &str) -> Self {
        self.selected = self
            .registry
            .select(|meta| meta.id.eq_ignore_ascii_case(id));
        self
    }

    pub fn active_rule_count(&self) -> usize {
        self.selected.iter().filter(|s| **s).count()
    }

    /// Lint multiple files
    pub fn lint(&self, files: &[PathBuf]) -> LintResult {
        let start = Instant::now();

        let results: Vec<LintResult> = if self.config.engine.parallel {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.engine.thread_count())
                .build()
            {
                Ok(pool) => pool.install(|| files.par_iter().map(|f| self.lint_file(f)).collect()),
                Err(e) => {
                    log::warn!("could not build thread pool ({}); linting sequentially", e);
                    files.iter().map(|f| self.lint_file(f)).collect()
                }
            }
        } else {
            files.iter().map(|f| self.lint_file(f)).collect()
        };

        let mut combined = LintResult::default();
        for result in results {
            combined.merge(result);
        }

        combined.duration = start.elapsed();
        combined
    }

    /// Lint a single unit file
    pub fn lint_file(&self, path: &Path) -> LintResult {
        let mut result = LintResult {
            files_processed: 1,
            ..LintResult::default()
        };

        let unit = match self.load(path) {
            Ok(unit) => unit,
            Err(diag) => {
                result.count(std::slice::from_ref(&diag));
                result.diagnostics.push(diag);
                return result;
            }
        };
        log::debug!("linting {} ({} nodes)", path.display(), unit.tree.len());

        let (diagnostics, timings) = self.lint_unit_timed(&unit);
        result.count(&diagnostics);
        result.diagnostics = diagnostics;
        result.rule_timings = timings;
        result
    }

    /// Load a unit, or the diagnostic explaining why it could not be loaded
    pub fn load(&self, path: &Path) -> Result<Unit, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::new(
                "file-read-error",
                Severity::Error,
                &format!("Failed to read file: {}", e),
                Location::new(path.to_path_buf(), 0, 0),
            )
        })?;
        let parse_error = |e: crate::document::ParseError| {
            Diagnostic::new(
                "parse-error",
                Severity::Error,
                &format!("Parse error: {}", e),
                Location::new(path.to_path_buf(), 0, 0),
            )
        };
        let format = crate::document::UnitFormat::from_path(path).map_err(parse_error)?;
        let unit = Unit::parse(&content, path, format).map_err(parse_error)?;
        Ok(unit.with_disable_prefix(&self.config.inline_disable.prefix))
    }

    /// Diagnostics for an already loaded unit
    pub fn lint_unit(&self, unit: &Unit) -> Vec<Diagnostic> {
        self.lint_unit_timed(unit).0
    }

    fn lint_unit_timed(&self, unit: &Unit) -> (Vec<Diagnostic>, HashMap<String, RuleTiming>) {
        let (raw, timings) = self.registry.dispatch(unit, &self.selected, self.timing);
        let source_lines = unit.source_lines();
        let cx = RuleContext::new(unit);

        let diagnostics = raw
            .into_iter()
            .filter(|d| !self.is_suppressed(unit, d))
            .map(|d| self.decorate(&cx, d, &source_lines))
            .collect();
        (diagnostics, timings)
    }

    /// Selected, unsuppressed diagnostics without presentation details
    pub fn diagnose(&self, unit: &Unit) -> Vec<Diagnostic> {
        let (raw, _) = self.registry.dispatch(unit, &self.selected, false);
        raw.into_iter()
            .filter(|d| !self.is_suppressed(unit, d))
            .collect()
    }

    fn is_suppressed(&self, unit: &Unit, diag: &Diagnostic) -> bool {
        self.config
            .should_ignore_rule_for_file(&diag.rule_id, &unit.path)
            || (self.config.inline_disable.enabled
                && (unit.is_rule_disabled(&diag.rule_id, diag.location.line)
                    || unit.is_rule_disabled_for_file(&diag.rule_id)))
    }

    fn decorate(&self, cx: &RuleContext<'_>, mut diag: Diagnostic, source_lines: &[&str]) -> Diagnostic {
        if let Some(severity) = self.config.get_severity_override(&diag.rule_id) {
            diag.severity = severity;
        }

        let line = diag.location.line;
        if line > 0 && line <= source_lines.len() {
            diag = diag.with_source_line(source_lines[line - 1]);
            if self.context_lines > 0 {
                diag = diag.with_context(source_lines, self.context_lines);
            }
        }

        let Some(rule) = self.registry.get(&diag.rule_id) else {
            return diag;
        };
        let meta = rule.meta();
        diag = diag.with_help(meta.rationale.unwrap_or(meta.description));

        if meta.is_fixable() {
            if let Some(fix) = fix_hint(rule, cx, &diag) {
                diag = diag.with_fix(fix);
            }
        }
        diag
    }
}

/// Title, safety and primary replacement text of a diagnostic's rewrite
pub fn fix_hint(rule: &dyn Rule, cx: &RuleContext<'_>, diag: &Diagnostic) -> Option<FixHint> {
    let rewrite = rule.fix(cx, diag)?;
    let mut hint = FixHint::new(&rewrite.title, rewrite.safety);
    if let Some(Edit::Replace { target, .. }) = rewrite.edits.first() {
        match rewrite::apply(cx.tree, cx.symbols, &rewrite) {
            Ok(rewritten) => {
                hint.replacement = rewritten.replacement_text(*target).map(str::to_string);
            }
            Err(e) => {
                log::debug!("{} fix does not apply: {}", diag.rule_id, e);
                return None;
            }
        }
    }
    Some(hint)
}
