//! Sorting and pagination

use super::{is_query_call, is_query_call_named};
use crate::diagnostic::{Diagnostic, Severity};
use crate::ef::{self, REFINE_SORT_METHODS, SORT_METHODS};
use crate::rule::{Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::tree::{NodeId, NodeKind};
use crate::walker;

const PAGING_METHODS: &[&str] = &["Skip", "Take", "Last", "LastOrDefault", "Chunk"];
const BOUND_METHODS: &[&str] = &["Skip", "Take", "SkipWhile", "TakeWhile"];

fn is_sort(cx: &RuleContext<'_>, call: NodeId) -> bool {
    is_query_call_named(cx, call, SORT_METHODS)
}

fn is_refine(cx: &RuleContext<'_>, call: NodeId) -> bool {
    is_query_call_named(cx, call, REFINE_SORT_METHODS)
}

// LC005

static REPEATED_ORDER_BY: RuleMeta = RuleMeta {
    id: "LC005",
    name: "repeated-order-by",
    severity: Severity::Warning,
    category: RuleCategory::Suspicious,
    stability: RuleStability::Stable,
    description: "Sorts a query that is already sorted, discarding the first ordering",
    rationale: Some(
        "A second OrderBy replaces the ordering established by the first one instead of \
         refining it. Secondary keys go through ThenBy.",
    ),
    message: "'{0}' discards the ordering applied by an earlier '{1}'. Use 'ThenBy' or 'ThenByDescending' to add a secondary key.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct RepeatedOrderBy;

impl Rule for RepeatedOrderBy {
    fn meta(&self) -> &'static RuleMeta {
        &REPEATED_ORDER_BY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_sort(cx, node) {
            return vec![];
        }
        for call in walker::upstream_calls(cx.tree, cx.symbols, node) {
            if is_refine(cx, call) {
                return vec![];
            }
            // Re-sorting a bounded subset is a separate finding
            if is_query_call_named(cx, call, BOUND_METHODS) {
                return vec![];
            }
            if is_sort(cx, call) {
                let args = vec![cx.name(node).to_string(), cx.name(call).to_string()];
                return vec![cx.report(&REPEATED_ORDER_BY, node, args)];
            }
        }
        vec![]
    }
}

// LC015

static UNORDERED_PAGINATION: RuleMeta = RuleMeta {
    id: "LC015",
    name: "unordered-pagination",
    severity: Severity::Warning,
    category: RuleCategory::Suspicious,
    stability: RuleStability::Stable,
    description: "Pages or takes the last rows of a query that has no ordering",
    rationale: Some(
        "Pagination and Last operations on unordered IQueryables are non-deterministic. \
         Sorting must happen before Skip/Take.",
    ),
    message: "The method '{0}' is called on an unordered IQueryable. Call 'OrderBy' or 'OrderByDescending' first to ensure deterministic results.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct UnorderedPagination;

impl Rule for UnorderedPagination {
    fn meta(&self) -> &'static RuleMeta {
        &UNORDERED_PAGINATION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_query_call_named(cx, node, PAGING_METHODS) || !cx.on_queryable(node) {
            return vec![];
        }
        if cx
            .receiver_type(node)
            .is_some_and(|t| ef::is_ordered_queryable(cx.symbols, t))
        {
            return vec![];
        }
        let upstream: Vec<NodeId> = walker::upstream_calls(cx.tree, cx.symbols, node).collect();
        if upstream.iter().any(|&c| is_sort(cx, c) || is_refine(cx, c)) {
            return vec![];
        }
        // Only the first page operator of a chain is reported
        if upstream
            .iter()
            .any(|&c| is_query_call_named(cx, c, &["Skip", "Take"]))
        {
            return vec![];
        }
        let mut next = walker::downstream(cx.tree, cx.symbols, node);
        while let Some(current) = next {
            if is_sort(cx, current) {
                return vec![];
            }
            next = walker::downstream(cx.tree, cx.symbols, current);
        }
        vec![cx.report(&UNORDERED_PAGINATION, node, vec![cx.name(node).to_string()])]
    }
}

// LC017

static SORT_AFTER_BOUND: RuleMeta = RuleMeta {
    id: "LC017",
    name: "sort-after-bound",
    severity: Severity::Warning,
    category: RuleCategory::Suspicious,
    stability: RuleStability::Stable,
    description: "Sorts a query after Skip or Take has already cut it down",
    rationale: Some(
        "Calling OrderBy after Skip or Take is usually a logic error. Sort the data before \
         applying pagination.",
    ),
    message: "The method '{0}' is called after 'Skip' or 'Take'. This results in sorting a subset of the data rather than the full set.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct SortAfterBound;

impl Rule for SortAfterBound {
    fn meta(&self) -> &'static RuleMeta {
        &SORT_AFTER_BOUND
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_sort(cx, node) {
            return vec![];
        }
        let mut bounded = false;
        for call in walker::upstream_calls(cx.tree, cx.symbols, node) {
            if !is_query_call(cx, call) {
                continue;
            }
            if is_sort(cx, call) || is_refine(cx, call) {
                // Sorted before the bound: a top-N reordered for display
                if bounded {
                    return vec![];
                }
                break;
            }
            if ef::is_one_of(cx.name(call), BOUND_METHODS) {
                bounded = true;
            }
        }
        if !bounded {
            return vec![];
        }
        vec![cx.report(&SORT_AFTER_BOUND, node, vec![cx.name(node).to_string()])]
    }
}
