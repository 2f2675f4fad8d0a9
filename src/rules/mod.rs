//! The rule catalog
//!
//! Rules are grouped by theme, one unit struct per rule with a static
//! [`RuleMeta`](crate::rule::RuleMeta). [`all`] lists them in id order;
//! the registry relies on that order for stable diagnostic output.

mod asynchrony;
mod loading;
mod loops;
mod materialization;
mod model;
mod ordering;
mod tracking;
mod translation;

use crate::ef;
use crate::rewrite::{SymbolRef, Template};
use crate::rule::{Rule, RuleContext};
use crate::symbols::{SymbolTable, TypeId};
use crate::tree::{NodeId, NodeKind, Tree};

pub fn all() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(translation::LocalMethodInQuery),
        Box::new(materialization::PrematureMaterialization),
        Box::new(materialization::CountInsteadOfAny),
        Box::new(materialization::QueryAsEnumerableParameter),
        Box::new(ordering::RepeatedOrderBy),
        Box::new(loading::CartesianExplosion),
        Box::new(loops::QueryInLoop),
        Box::new(asynchrony::SyncCallInAsync),
        Box::new(tracking::MissingNoTracking),
        Box::new(loops::SaveChangesInLoop),
        Box::new(model::MissingPrimaryKey),
        Box::new(materialization::RemoveRangeOnQuery),
        Box::new(tracking::DisposedContextQuery),
        Box::new(translation::CaseConversionInQuery),
        Box::new(ordering::UnorderedPagination),
        Box::new(translation::ClockInQuery),
        Box::new(ordering::SortAfterBound),
        Box::new(translation::RawSqlInterpolation),
        Box::new(loading::ConditionalInclude),
        Box::new(translation::StringComparisonInQuery),
        Box::new(translation::IgnoreQueryFilters),
        Box::new(loops::ExplicitLoadInLoop),
        Box::new(materialization::PrimaryKeyScan),
        Box::new(translation::GroupElementAccess),
        Box::new(tracking::UntrackedEntityMutation),
        Box::new(asynchrony::MissingCancellationToken),
        Box::new(model::ImplicitForeignKey),
        Box::new(loading::DeepThenInclude),
        Box::new(materialization::IdentitySelect),
        Box::new(model::LongLivedContext),
        Box::new(materialization::UnboundedMaterialization),
        Box::new(materialization::MaterializeInProjection),
    ]
}

// Shared helpers

/// Name without a trailing `Async`
pub(crate) fn sync_name(name: &str) -> &str {
    name.strip_suffix("Async").unwrap_or(name)
}

/// Call bound to a Linq or EF operator
pub(crate) fn is_query_call(cx: &RuleContext<'_>, call: NodeId) -> bool {
    cx.kind(call) == NodeKind::Call
        && cx
            .method(call)
            .is_some_and(|m| ef::is_query_operator(cx.symbols, m))
}

/// Query operator call named one of `names`
pub(crate) fn is_query_call_named(cx: &RuleContext<'_>, call: NodeId, names: &[&str]) -> bool {
    is_query_call(cx, call) && names.contains(&cx.name(call))
}

/// Call that copies a sequence into an in-memory collection
pub(crate) fn is_materializer(cx: &RuleContext<'_>, call: NodeId) -> bool {
    is_query_call_named(cx, call, ef::COLLECTION_MATERIALIZERS)
}

/// First written argument that is a lambda
pub(crate) fn lambda_arg(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
    cx.args(call)
        .into_iter()
        .find(|&a| cx.kind(a) == NodeKind::Lambda)
}

/// Whether `id` is an identifier naming the lambda parameter `param`
pub(crate) fn refers_to(cx: &RuleContext<'_>, id: NodeId, param: NodeId) -> bool {
    let id = cx.tree.unwrap_transparent(id);
    if cx.kind(id) != NodeKind::Identifier {
        return false;
    }
    match (cx.tree.node(id).symbol, cx.tree.node(param).symbol) {
        (Some(a), Some(b)) => a == b,
        _ => cx.name(id) == cx.name(param),
    }
}

/// Whether any node below `scope` (inclusive) references `param`
pub(crate) fn mentions(cx: &RuleContext<'_>, scope: NodeId, param: NodeId) -> bool {
    cx.tree.descendants(scope).any(|n| refers_to(cx, n, param))
}

/// Method, property, or field owned by a `DbContext` or `DbSet`
pub(crate) fn is_context_member(cx: &RuleContext<'_>, call: NodeId) -> bool {
    let owner = cx
        .method(call)
        .and_then(|m| m.containing_type)
        .or_else(|| cx.receiver_type(call));
    owner.is_some_and(|t| ef::is_db_context(cx.symbols, t) || ef::is_db_set(cx.symbols, t))
}

/// Call on a lazy query whose lambda argument (at any nesting depth)
/// contains `id`
pub(crate) fn query_lambda_call(cx: &RuleContext<'_>, id: NodeId) -> Option<NodeId> {
    let mut current = id;
    loop {
        let (_, call) = cx.enclosing_lambda_call(current)?;
        if cx.on_queryable(call) {
            return Some(call);
        }
        current = call;
    }
}

/// Template reproducing the syntactic receiver of a call
pub(crate) fn keep_receiver(cx: &RuleContext<'_>, call: NodeId) -> Option<Template> {
    cx.tree.receiver(call).map(Template::keep)
}

/// Copy of `call` under a new name, rebound to the sibling method of
/// that name when the owner declares one
pub(crate) fn renamed_call(cx: &RuleContext<'_>, call: NodeId, name: &str) -> Template {
    let mut copy = Template::copy(cx.tree, call).text(name);
    let owner = cx.method(call).and_then(|m| m.containing_type);
    copy.symbol = owner
        .and_then(|owner| {
            cx.symbols.symbol_ids().find(|&s| {
                cx.symbols.symbol(s).is_some_and(|m| {
                    m.is_method() && m.containing_type == Some(owner) && m.name == name
                })
            })
        })
        .map(SymbolRef::Existing);
    copy.build()
}

/// The statement holding `id` and the block that statement sits in
pub(crate) fn statement_in_block(tree: &Tree, id: NodeId) -> Option<(NodeId, NodeId)> {
    let statement = tree.enclosing_statement(id)?;
    let block = tree.parent(statement)?;
    (tree.kind(block) == NodeKind::Block).then_some((statement, block))
}

/// Type whose declaration is the `TypeDecl` node `node`
pub(crate) fn type_declared_at(symbols: &SymbolTable, node: NodeId) -> Option<TypeId> {
    symbols
        .type_ids()
        .find(|&t| symbols.ty(t).is_some_and(|info| info.declaration == Some(node)))
}

/// Keyword spelling for the built-in types, the display name otherwise
pub(crate) fn source_type_name(symbols: &SymbolTable, ty: TypeId) -> String {
    let keyword = symbols.ty(ty).and_then(|info| {
        if info.namespace != ef::SYSTEM {
            return None;
        }
        Some(match info.name.as_str() {
            "Int32" => "int",
            "Int64" => "long",
            "Int16" => "short",
            "String" => "string",
            "Boolean" => "bool",
            "Object" => "object",
            "Decimal" => "decimal",
            "Double" => "double",
            "Byte" => "byte",
            _ => return None,
        })
    });
    keyword
        .map(str::to_string)
        .unwrap_or_else(|| symbols.display(ty))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::FixSafety;
    use crate::registry::Registry;
    use crate::rule::RuleStability;

    #[test]
    fn test_catalog_is_complete() {
        let rules = all();
        assert_eq!(rules.len(), 32);
        for (i, rule) in rules.iter().enumerate() {
            let meta = rule.meta();
            assert_eq!(meta.id, format!("LC{:03}", i + 1));
            assert!(!meta.kinds.is_empty(), "{} subscribes to nothing", meta.id);
            assert!(!meta.message.contains('\u{2014}'));
        }
    }

    #[test]
    fn test_count_rule_is_default_and_safely_fixable() {
        let meta = Registry::global().get("LC003").unwrap().meta();
        assert_eq!(meta.stability, RuleStability::Stable);
        assert_eq!(meta.fix.map(|f| f.safety), Some(FixSafety::Safe));
    }

    #[test]
    fn test_source_type_name_keywords() {
        let w = crate::testing::World::new();
        assert_eq!(source_type_name(&w.symbols, w.types.int), "int");
        assert_eq!(source_type_name(&w.symbols, w.types.date_time), "DateTime");
    }
}
