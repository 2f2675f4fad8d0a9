//! Database round trips repeated by a loop

use super::{is_context_member, is_query_call, sync_name};
use crate::diagnostic::{Diagnostic, FixSafety, Severity};
use crate::ef::{self, EF_CHANGE_TRACKING, EXECUTION_METHODS};
use crate::rewrite::{Edit, Rewrite, Template};
use crate::rule::{FixMeta, Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::tree::{NodeId, NodeKind};
use crate::walker;

/// Nearest loop that evaluates `node` on every iteration
///
/// A `foreach` collection and a `for` initializer run once, so a node there
/// belongs to the next loop out, if any.
fn repeating_loop(cx: &RuleContext<'_>, node: NodeId) -> Option<NodeId> {
    let mut from = node;
    loop {
        let loop_node = walker::enclosing_loop(cx.tree, from)?;
        let mut part = from;
        while cx.tree.parent(part) != Some(loop_node) {
            part = cx.tree.parent(part)?;
        }
        let index = cx.tree.index_in_parent(part);
        let runs_once = match cx.kind(loop_node) {
            NodeKind::ForEach => index == Some(0),
            NodeKind::For => index == Some(0) && cx.tree.children(loop_node).len() == 4,
            _ => false,
        };
        if !runs_once {
            return Some(loop_node);
        }
        from = loop_node;
    }
}

fn repeats_per_iteration(cx: &RuleContext<'_>, node: NodeId) -> bool {
    repeating_loop(cx, node).is_some()
}

// LC007

static QUERY_IN_LOOP: RuleMeta = RuleMeta {
    id: "LC007",
    name: "query-in-loop",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Executes a query inside a loop (N+1)",
    rationale: Some(
        "Performing database queries inside a loop results in a database roundtrip for every \
         iteration. Fetch everything the loop needs with one query before it starts.",
    ),
    message: "Executing '{0}' inside a loop causes N+1 queries. Fetch data in bulk outside the loop.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct QueryInLoop;

impl QueryInLoop {
    fn executes(cx: &RuleContext<'_>, call: NodeId) -> bool {
        let name = cx.name(call);
        if matches!(name, "Find" | "FindAsync") {
            return cx
                .receiver_type(call)
                .is_some_and(|t| ef::is_db_set(cx.symbols, t));
        }
        ef::is_one_of(sync_name(name), EXECUTION_METHODS)
            && is_query_call(cx, call)
            && cx.on_queryable(call)
    }
}

impl Rule for QueryInLoop {
    fn meta(&self) -> &'static RuleMeta {
        &QUERY_IN_LOOP
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !Self::executes(cx, node) || !repeats_per_iteration(cx, node) {
            return vec![];
        }
        vec![cx.report(&QUERY_IN_LOOP, node, vec![cx.name(node).to_string()])]
    }
}

// LC010

static SAVE_CHANGES_IN_LOOP: RuleMeta = RuleMeta {
    id: "LC010",
    name: "save-changes-in-loop",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Calls SaveChanges inside a loop",
    rationale: Some(
        "The change tracker batches every pending change into one save. Saving per \
         iteration turns that into one transaction and round trip per item.",
    ),
    message: "'{0}' is called inside a loop; each iteration is a separate database round trip. Save once after the loop.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Move the save after the loop",
        safety: FixSafety::Unsafe,
    }),
};

pub struct SaveChangesInLoop;

impl SaveChangesInLoop {
    /// Expression statement consisting of `call`, awaited or not
    fn call_statement(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
        let statement = cx.tree.enclosing_statement(call)?;
        if cx.kind(statement) != NodeKind::ExprStmt {
            return None;
        }
        let expr = cx.tree.unwrap_transparent(cx.tree.child(statement, 0)?);
        let expr = if cx.kind(expr) == NodeKind::Await {
            cx.tree.unwrap_transparent(cx.tree.child(expr, 0)?)
        } else {
            expr
        };
        (expr == call).then_some(statement)
    }
}

impl Rule for SaveChangesInLoop {
    fn meta(&self) -> &'static RuleMeta {
        &SAVE_CHANGES_IN_LOOP
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !matches!(cx.name(node), "SaveChanges" | "SaveChangesAsync")
            || !is_context_member(cx, node)
            || !repeats_per_iteration(cx, node)
        {
            return vec![];
        }
        vec![cx.report(&SAVE_CHANGES_IN_LOOP, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let statement = Self::call_statement(cx, call)?;
        let loop_node = repeating_loop(cx, statement)?;
        let parent = cx.tree.parent(loop_node)?;
        if cx.kind(parent) != NodeKind::Block {
            return None;
        }
        let title = SAVE_CHANGES_IN_LOOP.fix.map(|f| f.title)?;
        Some(
            Rewrite::new(title, FixSafety::Unsafe)
                .remove(statement)
                .edit(Edit::InsertAfter {
                    anchor: loop_node,
                    node: Template::keep(statement),
                }),
        )
    }
}

// LC022

static EXPLICIT_LOAD_IN_LOOP: RuleMeta = RuleMeta {
    id: "LC022",
    name: "explicit-load-in-loop",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Explicitly loads a navigation inside a loop",
    rationale: Some(
        "Explicitly loading related entities (Load/LoadAsync) inside a loop results in \
         multiple database round-trips. Eager loading is usually more efficient.",
    ),
    message: "Method '{0}' is called inside a loop. This can cause N+1 database queries. Use eager loading with '.Include()' instead.",
    kinds: &[NodeKind::Call],
    fix: None,
};

const ENTRY_ACCESSORS: &[&str] = &["Reference", "Collection"];
const ENTRY_TYPES: &[&str] = &["ReferenceEntry", "CollectionEntry"];

pub struct ExplicitLoadInLoop;

impl ExplicitLoadInLoop {
    /// Name reported for an explicit load: the entry accessor it goes
    /// through, or the load itself when called on an entry value
    fn loaded_through(cx: &RuleContext<'_>, call: NodeId) -> Option<String> {
        let receiver = cx.tree.unwrap_transparent(cx.tree.receiver(call)?);
        if cx.kind(receiver) == NodeKind::Call && ef::is_one_of(cx.name(receiver), ENTRY_ACCESSORS) {
            return Some(cx.name(receiver).to_string());
        }
        let entry = cx.ty(receiver).and_then(|t| cx.symbols.ty(t))?;
        (entry.namespace == EF_CHANGE_TRACKING && ENTRY_TYPES.contains(&entry.name.as_str()))
            .then(|| cx.name(call).to_string())
    }
}

impl Rule for ExplicitLoadInLoop {
    fn meta(&self) -> &'static RuleMeta {
        &EXPLICIT_LOAD_IN_LOOP
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !matches!(cx.name(node), "Load" | "LoadAsync") || !repeats_per_iteration(cx, node) {
            return vec![];
        }
        match Self::loaded_through(cx, node) {
            Some(name) => vec![cx.report(&EXPLICIT_LOAD_IN_LOOP, node, vec![name])],
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{diagnose, fix_first};
    use crate::testing::World;
    use crate::tree::NodeId;
    use pretty_assertions::assert_eq;

    /// `foreach (var id in ids) { body }`
    fn in_loop(w: &mut World, statements: Vec<NodeId>) -> NodeId {
        let int = w.types.int;
        let ids_ty = w.list_of(int);
        let ids = w.local("ids", ids_ty);
        let body = w.b.block(statements);
        w.foreach("id", ids, body)
    }

    #[test]
    fn test_query_in_foreach() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let filtered = w.where_call(users);
        let list = w.queryable_call(filtered, "ToList", vec![]);
        let stmt = w.b.expr_stmt(list);
        let each = in_loop(&mut w, vec![stmt]);
        let unit = w.finish_stmts(vec![each]);

        let found = diagnose(&unit, "LC007");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["ToList".to_string()]);
    }

    #[test]
    fn test_find_in_loop() {
        let mut w = World::new();
        let user = w.entity("User", &["Id"]);
        let set = w.db_set_type(user);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let int = w.types.int;
        let id = w.local("id", int);
        let find = w.instance_call(users, set, "Find", vec![id], Some(user));
        let stmt = w.b.expr_stmt(find);
        let each = in_loop(&mut w, vec![stmt]);
        let unit = w.finish_stmts(vec![each]);

        let found = diagnose(&unit, "LC007");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Find".to_string()]);
    }

    #[test]
    fn test_query_as_loop_source_is_fine() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let list = w.queryable_call(users, "ToList", vec![]);
        let body = w.b.block(vec![]);
        let each = w.foreach("u", list, body);
        let unit = w.finish_stmts(vec![each]);
        assert!(diagnose(&unit, "LC007").is_empty());
    }

    #[test]
    fn test_inner_loop_source_repeats_with_outer_loop() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let list = w.queryable_call(users, "ToList", vec![]);
        let inner_body = w.b.block(vec![]);
        let inner = w.foreach("u", list, inner_body);
        let outer = in_loop(&mut w, vec![inner]);
        let unit = w.finish_stmts(vec![outer]);

        let found = diagnose(&unit, "LC007");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["ToList".to_string()]);
    }

    #[test]
    fn test_save_changes_hoisted_after_loop() {
        let mut w = World::new();
        let db = w.context_local("db");
        let save = w.save_changes(db, "SaveChanges");
        let stmt = w.b.expr_stmt(save);
        let each = in_loop(&mut w, vec![stmt]);
        let unit = w.finish_stmts(vec![each]);

        let found = diagnose(&unit, "LC010");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["SaveChanges".to_string()]);

        let fixed = fix_first(&unit, "LC010");
        assert!(
            fixed.source().ends_with("        }\n        db.SaveChanges();\n    }\n}"),
            "{}",
            fixed.source()
        );
        assert!(diagnose(&fixed, "LC010").is_empty());
    }

    #[test]
    fn test_awaited_save_keeps_await() {
        let mut w = World::new();
        let db = w.context_local("db");
        let save = w.save_changes(db, "SaveChangesAsync");
        let awaited = w.b.await_expr(save);
        let stmt = w.b.expr_stmt(awaited);
        let each = in_loop(&mut w, vec![stmt]);
        let unit = w.finish_async_stmts(vec![each]);

        let fixed = fix_first(&unit, "LC010");
        assert!(fixed.source().contains("}\n        await db.SaveChangesAsync();"));
    }

    #[test]
    fn test_reference_load_in_loop() {
        let mut w = World::new();
        let db = w.context_local("db");
        let user = w.entity("User", &["Id"]);
        let x = w.local("x", user);
        let entry = w.entry(db, x);
        let name = w.string_literal("Y");
        let entry_ty = w.types.entity_entry;
        let reference_ty = w.types.reference_entry;
        let reference = w.instance_call(entry, entry_ty, "Reference", vec![name], Some(reference_ty));
        let load = w.instance_call(reference, reference_ty, "Load", vec![], None);
        let stmt = w.b.expr_stmt(load);
        let each = in_loop(&mut w, vec![stmt]);
        let unit = w.finish_stmts(vec![each]);

        let found = diagnose(&unit, "LC022");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Reference".to_string()]);
        assert!(diagnose(&unit, "LC007").is_empty());
    }
}
