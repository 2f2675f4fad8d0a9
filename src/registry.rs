//! Static rule registry and the one-pass dispatcher
//!
//! Rules are a compiled list (see [`crate::rules::all`]) bucketed by the
//! node kinds they subscribe to. Dispatch walks a unit's tree once in
//! pre-order and calls each subscribed rule in registration order.

use crate::diagnostic::Diagnostic;
use crate::document::Unit;
use crate::engine::RuleTiming;
use crate::rule::{Rule, RuleContext, RuleMeta};
use crate::tree::NodeKind;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::time::Instant;

pub struct Registry {
    rules: Vec<Box<dyn Rule>>,
    /// Node kind -> indices into `rules`, ascending
    buckets: HashMap<NodeKind, Vec<usize>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// Process-wide registry, built on first use
    pub fn global() -> &'static Registry {
        REGISTRY.get_or_init(|| Registry::new(crate::rules::all()))
    }

    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        let mut buckets: HashMap<NodeKind, Vec<usize>> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            for &kind in rule.meta().kinds {
                let bucket = buckets.entry(kind).or_default();
                if !bucket.contains(&index) {
                    bucket.push(index);
                }
            }
        }
        Self { rules, buckets }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn metas(&self) -> impl Iterator<Item = &'static RuleMeta> + '_ {
        self.rules.iter().map(|r| r.meta())
    }

    /// Look up a rule by id (case-insensitive)
    pub fn get(&self, id: &str) -> Option<&dyn Rule> {
        self.rules
            .iter()
            .find(|r| r.meta().id.eq_ignore_ascii_case(id))
            .map(|r| r.as_ref())
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| r.meta().id.eq_ignore_ascii_case(id))
    }

    /// Selection mask with every rule on
    pub fn all_selected(&self) -> Vec<bool> {
        vec![true; self.rules.len()]
    }

    /// Selection mask for `keep`
    pub fn select(&self, keep: impl Fn(&RuleMeta) -> bool) -> Vec<bool> {
        self.rules.iter().map(|r| keep(r.meta())).collect()
    }

    /// Run every selected rule over `unit`
    ///
    /// Diagnostics come out in walk order, and within a node in
    /// registration order. A rule that panics on a node is logged and
    /// skipped for that node only.
    pub fn dispatch(
        &self,
        unit: &Unit,
        selected: &[bool],
        timing: bool,
    ) -> (Vec<Diagnostic>, HashMap<String, RuleTiming>) {
        let cx = RuleContext::new(unit);
        let mut diagnostics = Vec::new();
        let mut timings: HashMap<String, RuleTiming> = HashMap::new();

        for node in unit.tree.walk() {
            let Some(bucket) = self.buckets.get(&unit.tree.kind(node)) else {
                continue;
            };
            for &index in bucket {
                if !selected.get(index).copied().unwrap_or(false) {
                    continue;
                }
                let rule = self.rules[index].as_ref();
                let start = timing.then(Instant::now);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.check(&cx, node)));
                let found = match outcome {
                    Ok(found) => found,
                    Err(_) => {
                        log::warn!(
                            "rule {} panicked on node {} in {}; skipped",
                            rule.meta().id,
                            node,
                            unit.path.display()
                        );
                        Vec::new()
                    }
                };

                if let Some(start) = start {
                    let id = rule.meta().id;
                    let entry = timings
                        .entry(id.to_string())
                        .or_insert_with(|| RuleTiming::new(id));
                    entry.total_time += start.elapsed();
                    entry.evaluation_count += 1;
                    entry.match_count += found.len();
                }
                diagnostics.extend(found);
            }
        }

        (diagnostics, timings)
    }

    /// Diagnostics of a single rule
    pub fn dispatch_one(&self, unit: &Unit, id: &str) -> Vec<Diagnostic> {
        let mut selected = vec![false; self.rules.len()];
        if let Some(index) = self.index_of(id) {
            selected[index] = true;
        }
        self.dispatch(unit, &selected, false).0
    }
}
