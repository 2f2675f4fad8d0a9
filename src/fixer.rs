//! Batch fixing of analyzed units
//!
//! Each pass diagnoses a unit with the engine's selected rules, asks every
//! fixable rule for its rewrite, and accepts rewrites greedily in source
//! order. A rewrite overlapping one already accepted waits for the next
//! pass, which runs on the re-rendered tree. Passes repeat until nothing
//! applies or [`MAX_PASSES`] is reached.
//!
//! Fixes are classified as safe or unsafe:
//! - Safe fixes preserve the program's meaning and are applied by default
//! - Unsafe fixes may change runtime behavior and require explicit opt-in

use crate::config::Config;
use crate::diagnostic::{FixSafety, Location};
use crate::document::{Unit, UnitFormat};
use crate::engine::Engine;
use crate::rewrite::{self, Rewrite};
use crate::rule::RuleContext;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Upper bound on fix passes per unit
pub const MAX_PASSES: usize = 10;

/// A fix that would be applied (for --show-fixes)
#[derive(Debug, Clone)]
pub struct PendingFix {
    pub location: Location,
    pub rule_id: String,
    pub title: String,
    pub safety: FixSafety,
}

/// Result of applying fixes
#[derive(Debug, Default)]
pub struct FixResult {
    /// Number of files modified
    pub files_modified: usize,
    /// Number of fixes applied
    pub fixes_applied: usize,
    pub safe_fixes_applied: usize,
    pub unsafe_fixes_applied: usize,
    /// Number of fixes that failed
    pub fixes_failed: usize,
    /// Number of fixes skipped (unsafe when not allowed)
    pub fixes_skipped: usize,
    /// Errors encountered
    pub errors: Vec<String>,
    /// Diff output (if diff mode enabled)
    pub diffs: BTreeMap<PathBuf, String>,
    /// Fixes listed in show-only mode
    pub pending: Vec<PendingFix>,
}

impl FixResult {
    fn merge(&mut self, other: FixResult) {
        self.files_modified += other.files_modified;
        self.fixes_applied += other.fixes_applied;
        self.safe_fixes_applied += other.safe_fixes_applied;
        self.unsafe_fixes_applied += other.unsafe_fixes_applied;
        self.fixes_failed += other.fixes_failed;
        self.fixes_skipped += other.fixes_skipped;
        self.errors.extend(other.errors);
        self.diffs.extend(other.diffs);
        self.pending.extend(other.pending);
    }
}

/// Fix mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixMode {
    /// Apply only safe fixes (default)
    #[default]
    SafeOnly,
    /// Apply all fixes including unsafe
    All,
    /// Diff mode - show changes without applying
    Diff,
    /// Show fixes without applying
    ShowOnly,
}

/// Outcome of fixing one unit in memory
#[derive(Debug)]
pub struct UnitFix {
    pub unit: Unit,
    pub safe_applied: usize,
    pub unsafe_applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub passes: usize,
    pub errors: Vec<String>,
}

impl UnitFix {
    pub fn applied(&self) -> usize {
        self.safe_applied + self.unsafe_applied
    }
}

/// Auto-fixer driving the engine's rules over unit files
pub struct Fixer<'e> {
    engine: &'e Engine,
    /// Dry run mode (don't write changes)
    dry_run: bool,
    mode: FixMode,
    /// Include unsafe fixes in diff and show-only modes
    include_unsafe: bool,
    max_passes: usize,
}

impl<'e> Fixer<'e> {
    pub fn new(engine: &'e Engine, dry_run: bool) -> Self {
        Self {
            engine,
            dry_run,
            mode: FixMode::SafeOnly,
            include_unsafe: false,
            max_passes: MAX_PASSES,
        }
    }

    pub fn with_mode(mut self, mode: FixMode) -> Self {
        self.mode = mode;
        self
    }

    /// Include unsafe fixes
    pub fn with_unsafe_fixes(mut self, include: bool) -> Self {
        self.include_unsafe = include;
        if include && self.mode == FixMode::SafeOnly {
            self.mode = FixMode::All;
        }
        self
    }

    /// Limit the number of passes (a single pass batch-fixes one round)
    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes.max(1);
        self
    }

    pub fn mode(&self) -> FixMode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn should_apply(&self, safety: FixSafety) -> bool {
        match (self.mode, safety) {
            (_, FixSafety::Display) => false,
            (_, FixSafety::Safe) => true,
            (FixMode::All, FixSafety::Unsafe) => true,
            (FixMode::SafeOnly, FixSafety::Unsafe) => false,
            (FixMode::Diff | FixMode::ShowOnly, FixSafety::Unsafe) => self.include_unsafe,
        }
    }

    /// Fixes the first pass would apply, in source order
    pub fn pending(&self, unit: &Unit) -> Vec<PendingFix> {
        let cx = RuleContext::new(unit);
        let registry = self.engine.registry();
        let mut pending: Vec<PendingFix> = self
            .engine
            .diagnose(unit)
            .iter()
            .filter_map(|diag| {
                let rule = registry.get(&diag.rule_id)?;
                let rewrite = rule.fix(&cx, diag)?;
                self.should_apply(rewrite.safety).then(|| PendingFix {
                    location: diag.location.clone(),
                    rule_id: diag.rule_id.clone(),
                    title: rewrite.title,
                    safety: rewrite.safety,
                })
            })
            .collect();
        pending.sort_by(|a, b| {
            (a.location.line, a.location.column).cmp(&(b.location.line, b.location.column))
        });
        pending
    }

    /// Apply fixes to `unit` in passes until it settles
    pub fn fix_unit(&self, unit: Unit) -> UnitFix {
        let mut outcome = UnitFix {
            unit,
            safe_applied: 0,
            unsafe_applied: 0,
            skipped: 0,
            failed: 0,
            passes: 0,
            errors: Vec::new(),
        };
        let prefix = self.engine.config().inline_disable.prefix.clone();

        while outcome.passes < self.max_passes {
            let current = &outcome.unit;
            let cx = RuleContext::new(current);
            let registry = self.engine.registry();

            // Skips are recounted each pass; the last pass holds the final tally
            let mut skipped = 0;
            let mut candidates: Vec<(usize, String, Rewrite)> = Vec::new();
            for diag in self.engine.diagnose(current) {
                let Some(rule) = registry.get(&diag.rule_id) else {
                    continue;
                };
                let Some(rewrite) = rule.fix(&cx, &diag) else {
                    continue;
                };
                if !self.should_apply(rewrite.safety) {
                    skipped += 1;
                    continue;
                }
                let start = rewrite
                    .spans(&current.tree)
                    .iter()
                    .map(|s| s.start)
                    .min()
                    .unwrap_or(usize::MAX);
                candidates.push((start, diag.rule_id, rewrite));
            }
            outcome.skipped = skipped;
            candidates.sort_by_key(|(start, _, _)| *start);

            let mut accepted: Vec<Rewrite> = Vec::new();
            for (_, rule_id, rewrite) in candidates {
                if accepted
                    .iter()
                    .any(|a| a.conflicts_with(&rewrite, &current.tree))
                {
                    log::warn!(
                        "{}: deferring {} fix '{}' to the next pass (overlaps an accepted fix)",
                        current.path.display(),
                        rule_id,
                        rewrite.title
                    );
                    continue;
                }
                accepted.push(rewrite);
            }
            if accepted.is_empty() {
                break;
            }

            outcome.passes += 1;
            match rewrite::apply_batch(&current.tree, &current.symbols, &accepted) {
                Ok(out) => {
                    for rewrite in &accepted {
                        match rewrite.safety {
                            FixSafety::Unsafe => outcome.unsafe_applied += 1,
                            _ => outcome.safe_applied += 1,
                        }
                    }
                    log::debug!(
                        "{}: pass {} applied {} fix(es)",
                        current.path.display(),
                        outcome.passes,
                        accepted.len()
                    );
                    outcome.unit =
                        Unit::new(current.path.clone(), out.tree, out.symbols).with_disable_prefix(&prefix);
                }
                Err(e) => {
                    outcome.failed += accepted.len();
                    outcome
                        .errors
                        .push(format!("{}: {}", current.path.display(), e));
                    break;
                }
            }
        }
        outcome
    }

    /// Fix every file, in parallel across files
    pub fn fix_files(&self, files: &[PathBuf]) -> FixResult {
        let results: Vec<FixResult> = files.par_iter().map(|f| self.fix_file(f)).collect();
        let mut combined = FixResult::default();
        for result in results {
            combined.merge(result);
        }
        combined
    }

    fn fix_file(&self, path: &Path) -> FixResult {
        let mut result = FixResult::default();
        let unit = match self.engine.load(path) {
            Ok(unit) => unit,
            Err(diag) => {
                result.errors.push(format!("{}: {}", path.display(), diag.message));
                return result;
            }
        };

        if self.mode == FixMode::ShowOnly {
            result.pending = self.pending(&unit);
            return result;
        }

        let original = unit.source().to_string();
        let fixed = self.fix_unit(unit);
        result.fixes_skipped = fixed.skipped;
        result.fixes_failed = fixed.failed;
        result.errors = fixed.errors.clone();
        if fixed.applied() == 0 {
            return result;
        }
        result.files_modified = 1;
        result.fixes_applied = fixed.applied();
        result.safe_fixes_applied = fixed.safe_applied;
        result.unsafe_fixes_applied = fixed.unsafe_applied;

        if self.mode == FixMode::Diff {
            let rendered = fixed_source_path(path);
            result
                .diffs
                .insert(rendered.clone(), unified_diff(&rendered, &original, fixed.unit.source()));
        } else if !self.dry_run {
            if let Err(e) = write_unit(path, &fixed.unit) {
                result.errors.push(format!("{}: {}", path.display(), e));
                result.fixes_failed += result.fixes_applied;
                result.fixes_applied = 0;
                result.safe_fixes_applied = 0;
                result.unsafe_fixes_applied = 0;
                result.files_modified = 0;
            }
        }
        result
    }

    /// Format fixes for display (--show-fixes)
    pub fn format_pending(&self, result: &FixResult) -> String {
        if result.pending.is_empty() {
            return "No fixes available.\n".to_string();
        }

        let mut output = format!("Found {} fix(es):\n\n", result.pending.len());
        let mut current_file: Option<&PathBuf> = None;
        for fix in &result.pending {
            if current_file != Some(&fix.location.file) {
                current_file = Some(&fix.location.file);
                output.push_str(&format!("{}:\n", fix.location.file.display()));
            }
            output.push_str(&format!(
                "  Line {}: [{}] {} - {}\n",
                fix.location.line, fix.safety, fix.rule_id, fix.title
            ));
        }
        output
    }

    /// Format diff output for display
    pub fn format_diffs(&self, result: &FixResult) -> String {
        result.diffs.values().map(String::as_str).collect()
    }
}

/// One pass of every non-conflicting rewrite `rule_id` offers for `unit`,
/// unsafe ones included, regardless of configured rule selection
pub fn batch_fix(rule_id: &str, unit: Unit) -> UnitFix {
    let engine = Engine::new(Config::default()).only_rule(rule_id);
    Fixer::new(&engine, true)
        .with_mode(FixMode::All)
        .with_max_passes(1)
        .fix_unit(unit)
}

/// Where the rendered source of a fixed unit is written: `Service.json` -> `Service.fixed.cs`
pub fn fixed_source_path(unit_path: &Path) -> PathBuf {
    unit_path.with_extension("fixed.cs")
}

/// Re-serialize the unit in its own format and emit its rendered source beside it
pub fn write_unit(path: &Path, unit: &Unit) -> Result<(), crate::document::ParseError> {
    let format = UnitFormat::from_path(path)?;
    std::fs::write(path, unit.serialize(format)?)?;
    let mut source = unit.source().to_string();
    if !source.ends_with('\n') {
        source.push('\n');
    }
    std::fs::write(fixed_source_path(path), source)?;
    Ok(())
}

/// Generate a unified diff between two renderings of a unit
pub fn unified_diff(file: &Path, original: &str, modified: &str) -> String {
    let name = file.display().to_string();
    similar::TextDiff::from_lines(original, modified)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", name), &format!("b/{}", name))
        .to_string()
}
