//! Eager loading with Include/ThenInclude

use super::{is_query_call, is_query_call_named, lambda_arg};
use crate::diagnostic::{Diagnostic, Severity};
use crate::ef;
use crate::rule::{Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::tree::{NodeId, NodeKind};
use crate::walker;

/// Calls that use `node` as their receiver, nearest first
fn downstream_calls(cx: &RuleContext<'_>, node: NodeId) -> Vec<NodeId> {
    let mut calls = Vec::new();
    let mut next = walker::downstream(cx.tree, cx.symbols, node);
    while let Some(current) = next {
        if cx.kind(current) == NodeKind::Call {
            calls.push(current);
        }
        next = walker::downstream(cx.tree, cx.symbols, current);
    }
    calls
}

// LC006

static CARTESIAN_EXPLOSION: RuleMeta = RuleMeta {
    id: "LC006",
    name: "cartesian-explosion",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Eagerly loads several collection navigations in one single-query statement",
    rationale: Some(
        "Each included collection is joined onto the others, so the result has the product \
         of their sizes as row count. Split queries load each collection separately.",
    ),
    message: "Query eagerly loads {0} collection navigations in a single statement, multiplying the returned rows. Use 'AsSplitQuery()' or load them separately.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct CartesianExplosion;

impl CartesianExplosion {
    fn includes_collection(cx: &RuleContext<'_>, call: NodeId) -> bool {
        if !is_query_call_named(cx, call, &["Include"]) {
            return false;
        }
        lambda_arg(cx, call)
            .and_then(|lambda| cx.tree.lambda_result(lambda))
            .and_then(|result| cx.ty(cx.tree.unwrap_transparent(result)))
            .is_some_and(|t| ef::is_enumerable(cx.symbols, t) && !ef::is_string(cx.symbols, t))
    }
}

impl Rule for CartesianExplosion {
    fn meta(&self) -> &'static RuleMeta {
        &CARTESIAN_EXPLOSION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !Self::includes_collection(cx, node) {
            return vec![];
        }
        let downstream = downstream_calls(cx, node);
        // Reported once, at the last collection include of the chain
        if downstream.iter().any(|&d| Self::includes_collection(cx, d)) {
            return vec![];
        }
        let upstream: Vec<NodeId> = walker::upstream_calls(cx.tree, cx.symbols, node).collect();
        let split = upstream
            .iter()
            .chain(&downstream)
            .any(|&c| is_query_call_named(cx, c, &["AsSplitQuery"]));
        if split {
            return vec![];
        }
        let count = 1 + upstream
            .iter()
            .filter(|&&c| Self::includes_collection(cx, c))
            .count();
        if count < 2 {
            return vec![];
        }
        vec![cx.report(&CARTESIAN_EXPLOSION, node, vec![count.to_string()])]
    }
}

// LC019

static CONDITIONAL_INCLUDE: RuleMeta = RuleMeta {
    id: "LC019",
    name: "conditional-include",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Uses a conditional expression as an Include/ThenInclude navigation",
    rationale: Some(
        "Include paths must be plain member accesses. A conditional or null-coalescing \
         navigation is rejected when the query is compiled.",
    ),
    message: "Conditional expressions in Include/ThenInclude are not supported by EF Core and will throw at runtime",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct ConditionalInclude;

impl Rule for ConditionalInclude {
    fn meta(&self) -> &'static RuleMeta {
        &CONDITIONAL_INCLUDE
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_query_call_named(cx, node, &["Include", "ThenInclude"]) {
            return vec![];
        }
        let conditional = lambda_arg(cx, node)
            .and_then(|lambda| cx.tree.lambda_result(lambda))
            .map(|result| cx.tree.unwrap_transparent(result))
            .is_some_and(|result| match cx.kind(result) {
                NodeKind::Conditional => true,
                NodeKind::Binary => cx.name(result) == "??",
                _ => false,
            });
        if !conditional {
            return vec![];
        }
        vec![cx.report(&CONDITIONAL_INCLUDE, node, vec![cx.name(node).to_string()])]
    }
}

// LC028

static DEEP_THEN_INCLUDE: RuleMeta = RuleMeta {
    id: "LC028",
    name: "deep-then-include",
    severity: Severity::Info,
    category: RuleCategory::Perf,
    stability: RuleStability::Preview,
    description: "Chains ThenInclude deeper than a few levels",
    rationale: Some(
        "Every level adds a join and widens each row. Deep graphs are usually better served \
         by a Select projection of the fields actually needed.",
    ),
    message: "ThenInclude chain is {0} levels deep (threshold: {1}). Consider using Select projection for deeply nested data.",
    kinds: &[NodeKind::Call],
    fix: None,
};

const THEN_INCLUDE_THRESHOLD: usize = 3;

pub struct DeepThenInclude;

impl Rule for DeepThenInclude {
    fn meta(&self) -> &'static RuleMeta {
        &DEEP_THEN_INCLUDE
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let is_then_include = |id: NodeId| {
            cx.kind(id) == NodeKind::Call && cx.name(id) == "ThenInclude" && is_query_call(cx, id)
        };
        if !is_then_include(node) {
            return vec![];
        }
        if walker::downstream(cx.tree, cx.symbols, node).is_some_and(|d| is_then_include(d)) {
            return vec![];
        }
        let depth = walker::walk_upstream(cx.tree, cx.symbols, node)
            .take_while(|&n| is_then_include(n))
            .count();
        if depth <= THEN_INCLUDE_THRESHOLD {
            return vec![];
        }
        vec![cx.report(
            &DEEP_THEN_INCLUDE,
            node,
            vec![depth.to_string(), THEN_INCLUDE_THRESHOLD.to_string()],
        )]
    }
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::diagnose;
    use crate::testing::World;
    use crate::tree::NodeId;
    use pretty_assertions::assert_eq;

    /// `db.Users` with `Orders` and `Roles` collection navigations
    fn users_with_collections(w: &mut World) -> NodeId {
        let user = w.entity("User", &["Id"]);
        let order = w.entity("Order", &["Id"]);
        let role = w.entity("Role", &["Id"]);
        let orders = w.list_of(order);
        let roles = w.list_of(role);
        w.add_property(user, "Orders", orders);
        w.add_property(user, "Roles", roles);
        let db = w.context_local("db");
        w.db_set(db, "Users")
    }

    fn include(w: &mut World, query: NodeId, member: &str) -> NodeId {
        let lambda = w.key_lambda(query, member);
        w.queryable_call(query, "Include", vec![lambda])
    }

    #[test]
    fn test_two_collection_includes() {
        let mut w = World::new();
        let users = users_with_collections(&mut w);
        let first = include(&mut w, users, "Orders");
        let second = include(&mut w, first, "Roles");
        let list = w.queryable_call(second, "ToList", vec![]);
        let unit = w.finish_expr(list);

        let found = diagnose(&unit, "LC006");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["2".to_string()]);
        assert_eq!(found[0].node, Some(second));
    }

    #[test]
    fn test_split_query_suppresses() {
        let mut w = World::new();
        let users = users_with_collections(&mut w);
        let first = include(&mut w, users, "Orders");
        let second = include(&mut w, first, "Roles");
        let split = w.queryable_call(second, "AsSplitQuery", vec![]);
        let list = w.queryable_call(split, "ToList", vec![]);
        let unit = w.finish_expr(list);
        assert!(diagnose(&unit, "LC006").is_empty());
    }

    #[test]
    fn test_single_collection_include_is_fine() {
        let mut w = World::new();
        let users = users_with_collections(&mut w);
        let first = include(&mut w, users, "Orders");
        let unit = w.finish_expr(first);
        assert!(diagnose(&unit, "LC006").is_empty());
    }

    #[test]
    fn test_conditional_include() {
        let mut w = World::new();
        let user = w.entity("User", &["Id"]);
        let order = w.entity("Order", &["Id"]);
        let orders_ty = w.list_of(order);
        w.add_property(user, "Orders", orders_ty);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let lambda = w.lambda1("x", Some(user), |w, x| {
            let a = w.use_symbol(x);
            let flag = w.member_of(a, "Active");
            let b = w.use_symbol(x);
            let then = w.member_of(b, "Orders");
            let c = w.use_symbol(x);
            let otherwise = w.member_of(c, "Orders");
            w.b.conditional(flag, then, otherwise)
        });
        let call = w.queryable_call(users, "Include", vec![lambda]);
        let unit = w.finish_expr(call);

        let found = diagnose(&unit, "LC019");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Include".to_string()]);
    }

    fn then_include_chain(levels: usize) -> crate::document::Unit {
        let mut w = World::new();
        let users = users_with_collections(&mut w);
        let mut query = include(&mut w, users, "Orders");
        for _ in 0..levels {
            let lambda = w.key_lambda(query, "Orders");
            query = w.queryable_call(query, "ThenInclude", vec![lambda]);
        }
        w.finish_expr(query)
    }

    #[test]
    fn test_deep_then_include_reported_once() {
        let found = diagnose(&then_include_chain(4), "LC028");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["4".to_string(), "3".to_string()]);
        assert!(diagnose(&then_include_chain(3), "LC028").is_empty());
    }
}
