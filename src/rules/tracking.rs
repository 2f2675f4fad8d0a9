//! Change tracking and context lifetime

use super::{is_context_member, is_materializer, is_query_call, sync_name};
use crate::diagnostic::{Diagnostic, FixSafety, Severity};
use crate::ef::{self, EXECUTION_METHODS};
use crate::rewrite::{Rewrite, Template};
use crate::rule::{FixMeta, Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::symbols::{SymbolId, SymbolKind};
use crate::tree::{NodeId, NodeKind};
use crate::walker;

const NO_TRACKING: &[&str] = &["AsNoTracking", "AsNoTrackingWithIdentityResolution"];

/// Returned expression with an `await` peeled off
fn returned_value(cx: &RuleContext<'_>, ret: NodeId) -> Option<NodeId> {
    let value = cx.tree.unwrap_transparent(cx.tree.child(ret, 0)?);
    if cx.kind(value) == NodeKind::Await {
        return cx.tree.child(value, 0).map(|v| cx.tree.unwrap_transparent(v));
    }
    Some(value)
}

fn no_tracking_upstream(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
    walker::upstream_calls(cx.tree, cx.symbols, call)
        .find(|&c| is_query_call(cx, c) && ef::is_one_of(cx.name(c), NO_TRACKING))
}

// LC009

static MISSING_NO_TRACKING: RuleMeta = RuleMeta {
    id: "LC009",
    name: "missing-no-tracking",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Returns tracked entities from a method that never saves",
    rationale: Some(
        "Tracked queries snapshot every returned entity for change detection. A method that \
         only reads pays for that without using it. The check is coarse: a save in another \
         method that receives the entities is not seen.",
    ),
    message: "'{0}' returns tracked entities from a read-only method. Add 'AsNoTracking()' to skip change tracking.",
    kinds: &[NodeKind::Return],
    fix: None,
};

pub struct MissingNoTracking;

impl MissingNoTracking {
    fn saves(cx: &RuleContext<'_>, scope: NodeId) -> bool {
        cx.tree.descendants(scope).any(|n| {
            cx.kind(n) == NodeKind::Call && matches!(cx.name(n), "SaveChanges" | "SaveChangesAsync")
        })
    }
}

impl Rule for MissingNoTracking {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_NO_TRACKING
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(call) = returned_value(cx, node) else {
            return vec![];
        };
        if cx.kind(call) != NodeKind::Call || !is_materializer(cx, call) || !cx.on_queryable(call) {
            return vec![];
        }
        let entity = cx
            .receiver_type(call)
            .and_then(|t| ef::element_type(cx.symbols, t));
        if !entity.is_some_and(|e| ef::mapped_entities(cx.symbols).contains(&e)) {
            return vec![];
        }
        if no_tracking_upstream(cx, call).is_some() {
            return vec![];
        }
        let Some(method) = cx.tree.enclosing_method(node) else {
            return vec![];
        };
        if Self::saves(cx, method) {
            return vec![];
        }
        vec![cx.report(&MISSING_NO_TRACKING, call, vec![cx.name(call).to_string()])]
    }
}

// LC013

static DISPOSED_CONTEXT_QUERY: RuleMeta = RuleMeta {
    id: "LC013",
    name: "disposed-context-query",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Returns a deferred query built on a context that is disposed on return",
    rationale: Some(
        "Returning a deferred query from a disposed context causes runtime errors. The query \
         only runs when the caller enumerates it, after the using scope has ended.",
    ),
    message: "The query is built from DbContext '{0}' which is disposed before enumeration. Materialize before returning.",
    kinds: &[NodeKind::Return],
    fix: None,
};

pub struct DisposedContextQuery;

impl DisposedContextQuery {
    /// Declaration of a scope-bound local, if `root` names one
    fn scoped_declaration(cx: &RuleContext<'_>, root: NodeId) -> Option<NodeId> {
        if cx.kind(root) != NodeKind::Identifier {
            return None;
        }
        let symbol = cx.symbol(root)?;
        if symbol.kind != SymbolKind::Local {
            return None;
        }
        let declaration = symbol.declaration.filter(|&d| cx.tree.contains(d))?;
        if cx.kind(declaration) != NodeKind::LocalDecl {
            return None;
        }
        let scoped = cx.tree.node(declaration).flags.is_using
            || cx
                .tree
                .parent(declaration)
                .is_some_and(|p| cx.kind(p) == NodeKind::UsingStmt);
        scoped.then_some(declaration)
    }
}

impl Rule for DisposedContextQuery {
    fn meta(&self) -> &'static RuleMeta {
        &DISPOSED_CONTEXT_QUERY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(value) = cx.tree.child(node, 0).map(|v| cx.tree.unwrap_transparent(v)) else {
            return vec![];
        };
        if !cx.ty(value).is_some_and(|t| ef::is_queryable(cx.symbols, t)) {
            return vec![];
        }
        let root = walker::chain_root(cx.tree, cx.symbols, value);
        let Some(declaration) = Self::scoped_declaration(cx, root) else {
            return vec![];
        };
        if cx.tree.enclosing_function(declaration) != cx.tree.enclosing_function(node) {
            return vec![];
        }
        vec![cx.report_span(&DISPOSED_CONTEXT_QUERY, value, vec![cx.name(root).to_string()])]
    }
}

// LC025

static UNTRACKED_ENTITY_MUTATION: RuleMeta = RuleMeta {
    id: "LC025",
    name: "untracked-entity-mutation",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Passes an entity loaded with AsNoTracking to Update or Remove",
    rationale: Some(
        "Passing untracked entities to Update() causes EF Core to mark all properties as \
         modified, leading to inefficient SQL. Remove AsNoTracking() if the entity will be \
         modified.",
    ),
    message: "Entity from an 'AsNoTracking' query is passed to '{0}'. This can lead to inefficient updates or tracking issues.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Remove AsNoTracking() from the originating query",
        safety: FixSafety::Unsafe,
    }),
};

const TRACKED_MUTATIONS: &[&str] = &["Update", "UpdateRange", "Remove", "RemoveRange", "Attach"];

pub struct UntrackedEntityMutation;

impl UntrackedEntityMutation {
    /// Local passed as the mutated entity
    fn mutated_local(cx: &RuleContext<'_>, call: NodeId) -> Option<(NodeId, SymbolId)> {
        if !ef::is_one_of(cx.name(call), TRACKED_MUTATIONS) || !is_context_member(cx, call) {
            return None;
        }
        let arg = *cx.args(call).first()?;
        if cx.kind(arg) != NodeKind::Identifier {
            return None;
        }
        let symbol = cx.tree.node(arg).symbol?;
        (cx.symbols.symbol(symbol)?.kind == SymbolKind::Local).then_some((arg, symbol))
    }

    /// `AsNoTracking` call of an executed query
    fn untracked_query(cx: &RuleContext<'_>, expr: NodeId) -> Option<NodeId> {
        let mut expr = cx.tree.unwrap_transparent(expr);
        if cx.kind(expr) == NodeKind::Await {
            expr = cx.tree.unwrap_transparent(cx.tree.child(expr, 0)?);
        }
        if cx.kind(expr) != NodeKind::Call || !is_query_call(cx, expr) {
            return None;
        }
        if !is_materializer(cx, expr) && !ef::is_one_of(sync_name(cx.name(expr)), EXECUTION_METHODS) {
            return None;
        }
        no_tracking_upstream(cx, expr)
    }

    /// Where the value of `local` came from within `scope`: an
    /// initializer, an assignment, or the collection a loop iterates
    fn origin(cx: &RuleContext<'_>, scope: NodeId, local: SymbolId, depth: usize) -> Option<NodeId> {
        let binds = |n: NodeId| cx.tree.node(n).symbol == Some(local);
        for n in cx.tree.descendants(scope) {
            let source = match cx.kind(n) {
                NodeKind::LocalDecl if binds(n) => cx.tree.child(n, 0),
                NodeKind::Assignment => match cx.tree.children(n) {
                    [target, value] if cx.kind(*target) == NodeKind::Identifier && binds(*target) => {
                        Some(*value)
                    }
                    _ => None,
                },
                NodeKind::ForEach if binds(n) => cx.tree.child(n, 0),
                _ => None,
            };
            let Some(source) = source else {
                continue;
            };
            if let Some(found) = Self::untracked_query(cx, source) {
                return Some(found);
            }
            // One hop through the local a loop iterates
            if cx.kind(n) == NodeKind::ForEach && depth > 0 {
                let collection = cx.tree.unwrap_transparent(source);
                let traced = cx
                    .tree
                    .node(collection)
                    .symbol
                    .filter(|&s| cx.symbols.symbol(s).is_some_and(|s| s.kind == SymbolKind::Local))
                    .and_then(|s| Self::origin(cx, scope, s, depth - 1));
                if traced.is_some() {
                    return traced;
                }
            }
        }
        None
    }

    fn untracked_origin(cx: &RuleContext<'_>, call: NodeId) -> Option<(NodeId, NodeId)> {
        let (arg, local) = Self::mutated_local(cx, call)?;
        let scope = cx.tree.enclosing_method(call)?;
        Self::origin(cx, scope, local, 1).map(|origin| (arg, origin))
    }
}

impl Rule for UntrackedEntityMutation {
    fn meta(&self) -> &'static RuleMeta {
        &UNTRACKED_ENTITY_MUTATION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        match Self::untracked_origin(cx, node) {
            Some((arg, _)) => vec![cx.report_span(
                &UNTRACKED_ENTITY_MUTATION,
                arg,
                vec![cx.name(node).to_string()],
            )],
            None => vec![],
        }
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let arg = diagnostic.node?;
        let call = cx.tree.nearest(arg, &[NodeKind::Call])?;
        let (_, no_tracking) = Self::untracked_origin(cx, call)?;
        let receiver = cx.tree.receiver(no_tracking)?;
        let title = UNTRACKED_ENTITY_MUTATION.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Unsafe).replace(no_tracking, Template::keep(receiver)))
    }
}

#[cfg(test)]
mod tests {
    use crate::rules::test_support::{diagnose, fix_first};
    use crate::testing::World;
    use crate::tree::NodeId;
    use pretty_assertions::assert_eq;

    /// `public class AppDb : DbContext { public DbSet<User> Users { get; set; } }`
    fn declare_context(w: &mut World) -> NodeId {
        let user = w.entity("User", &["Id"]);
        let set = w.set_property("Users", user);
        w.context_class("AppDb", vec![set])
    }

    /// `List<User> GetUsers() { statements; return value; }` next to the context
    fn returning_method(mut w: World, value: NodeId, mut statements: Vec<NodeId>) -> crate::document::Unit {
        let ret = w.b.ret(Some(value));
        statements.push(ret);
        let body = w.b.block(statements);
        let method = w.service_method("List<User>", "GetUsers", vec![], body);
        let context = declare_context(&mut w);
        let service = w.types.service;
        let class = w.declare_class(service, None, vec![method]);
        w.finish_items(vec![context, class])
    }

    #[test]
    fn test_read_only_method_without_no_tracking() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let list = w.queryable_call(users, "ToList", vec![]);
        let unit = returning_method(w, list, vec![]);

        let found = diagnose(&unit, "LC009");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["ToList".to_string()]);
    }

    #[test]
    fn test_no_tracking_query_is_fine() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let untracked = w.queryable_call(users, "AsNoTracking", vec![]);
        let list = w.queryable_call(untracked, "ToList", vec![]);
        let unit = returning_method(w, list, vec![]);
        assert!(diagnose(&unit, "LC009").is_empty());
    }

    #[test]
    fn test_method_that_saves_is_fine() {
        let mut w = World::new();
        let db = w.context_local("db");
        let save = w.save_changes(db, "SaveChanges");
        let save = w.b.expr_stmt(save);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let list = w.queryable_call(users, "ToList", vec![]);
        let unit = returning_method(w, list, vec![save]);
        assert!(diagnose(&unit, "LC009").is_empty());
    }

    #[test]
    fn test_query_returned_from_using_scope() {
        let mut w = World::new();
        let app_db = w.types.app_db;
        let create = w.b.object_creation("AppDb", vec![]);
        w.b.typed(create, app_db);
        let decl = w.decl_local("db", create);
        w.b.using_decl(decl);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let filtered = w.where_call(users);
        let ret = w.b.ret(Some(filtered));
        let unit = w.finish_stmts(vec![decl, ret]);

        let found = diagnose(&unit, "LC013");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["db".to_string()]);
        assert_eq!(found[0].node, Some(filtered));
    }

    #[test]
    fn test_materialized_result_from_using_scope_is_fine() {
        let mut w = World::new();
        let app_db = w.types.app_db;
        let create = w.b.object_creation("AppDb", vec![]);
        w.b.typed(create, app_db);
        let decl = w.decl_local("db", create);
        w.b.using_decl(decl);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let list = w.queryable_call(users, "ToList", vec![]);
        let ret = w.b.ret(Some(list));
        let unit = w.finish_stmts(vec![decl, ret]);
        assert!(diagnose(&unit, "LC013").is_empty());
    }

    #[test]
    fn test_update_of_untracked_entity() {
        let mut w = World::new();
        let user = w.entity("User", &["Id"]);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let untracked = w.queryable_call(users, "AsNoTracking", vec![]);
        let first = w.queryable_call(untracked, "First", vec![]);
        let decl = w.decl_local("user", first);
        let db = w.context_local("db");
        let entity = w.local("user", user);
        let update = w.context_call(db, "Update", vec![entity]);
        let update = w.b.expr_stmt(update);
        let unit = w.finish_stmts(vec![decl, update]);

        let found = diagnose(&unit, "LC025");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Update".to_string()]);
        assert_eq!(found[0].node, Some(entity));

        let fixed = fix_first(&unit, "LC025");
        assert!(fixed.source().contains("var user = db.Users.First();"));
        assert!(diagnose(&fixed, "LC025").is_empty());
    }

    #[test]
    fn test_remove_of_loop_variable_over_untracked_list() {
        let mut w = World::new();
        let user = w.entity("User", &["Id"]);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let untracked = w.queryable_call(users, "AsNoTracking", vec![]);
        let list = w.queryable_call(untracked, "ToList", vec![]);
        let decl = w.decl_local("users", list);
        let list_ty = w.list_of(user);
        let source = w.local("users", list_ty);
        let db = w.context_local("db");
        let each = w.local("u", user);
        let remove = w.context_call(db, "Remove", vec![each]);
        let remove = w.b.expr_stmt(remove);
        let body = w.b.block(vec![remove]);
        let looped = w.foreach("u", source, body);
        let unit = w.finish_stmts(vec![decl, looped]);

        let found = diagnose(&unit, "LC025");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Remove".to_string()]);
    }

    #[test]
    fn test_tracked_entity_is_fine() {
        let mut w = World::new();
        let user = w.entity("User", &["Id"]);
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let first = w.queryable_call(users, "First", vec![]);
        let decl = w.decl_local("user", first);
        let db = w.context_local("db");
        let entity = w.local("user", user);
        let update = w.context_call(db, "Update", vec![entity]);
        let update = w.b.expr_stmt(update);
        let unit = w.finish_stmts(vec![decl, update]);
        assert!(diagnose(&unit, "LC025").is_empty());
    }
}
