//! When and how much a query loads into memory

use super::{
    is_context_member, is_materializer, is_query_call, is_query_call_named, keep_receiver,
    lambda_arg, mentions, query_lambda_call, refers_to, sync_name,
};
use crate::diagnostic::{format_message, Diagnostic, FixSafety, Severity};
use crate::ef;
use crate::rewrite::{NewNode, Rewrite, Template};
use crate::rule::{FixMeta, Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::symbols::SymbolKind;
use crate::tree::{NodeId, NodeKind};
use crate::walker;

// LC002

static PREMATURE_MATERIALIZATION: RuleMeta = RuleMeta {
    id: "LC002",
    name: "premature-materialization",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Filters or shapes a query after it has been loaded into memory",
    rationale: Some(
        "Everything before the materializing call runs in the database, everything after it \
         runs in memory over the full result. Compose the query first and materialize last.",
    ),
    message: "Calling '{0}' on materialized collection but source was IQueryable. This fetches all data before filtering.",
    kinds: &[NodeKind::Call],
    fix: None,
};

const REDUNDANT_MATERIALIZATION: &str =
    "The call to '{0}' is redundant because the sequence was already materialized by '{1}'";

pub struct PrematureMaterialization;

impl PrematureMaterialization {
    /// Collection copies, `ToImmutable*`, and `AsEnumerable`
    fn materializes(cx: &RuleContext<'_>, call: NodeId) -> bool {
        if is_materializer(cx, call) || is_query_call_named(cx, call, &["AsEnumerable"]) {
            return true;
        }
        cx.kind(call) == NodeKind::Call
            && cx.name(call).starts_with("ToImmutable")
            && cx
                .method(call)
                .and_then(|m| ef::containing_namespace(cx.symbols, m))
                .is_some_and(|ns| ns == ef::IMMUTABLE)
    }

    /// The lazy query a materialized receiver was copied from
    fn materialized_from(cx: &RuleContext<'_>, receiver: NodeId) -> Option<NodeId> {
        match cx.kind(receiver) {
            NodeKind::Call if Self::materializes(cx, receiver) => {
                cx.receiver(receiver)
            }
            NodeKind::ObjectCreation
                if walker::is_materializing_constructor(cx.tree, cx.symbols, receiver) =>
            {
                cx.tree.arg(receiver, 0).map(|a| cx.tree.unwrap_transparent(a))
            }
            _ => None,
        }
    }
}

impl Rule for PrematureMaterialization {
    fn meta(&self) -> &'static RuleMeta {
        &PREMATURE_MATERIALIZATION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(method) = cx.method(node) else {
            return vec![];
        };
        let Some(receiver) = cx.receiver(node) else {
            return vec![];
        };

        if Self::materializes(cx, node)
            && cx.kind(receiver) == NodeKind::Call
            && Self::materializes(cx, receiver)
        {
            let args = vec![cx.name(node).to_string(), cx.name(receiver).to_string()];
            let mut diagnostic = cx.report(&PREMATURE_MATERIALIZATION, node, args.clone());
            diagnostic.message = format_message(REDUNDANT_MATERIALIZATION, &args);
            return vec![diagnostic];
        }

        if !ef::is_enumerable_operator(cx.symbols, method)
            || cx.ty(receiver).is_some_and(|t| ef::is_queryable(cx.symbols, t))
        {
            return vec![];
        }
        let from_query = Self::materialized_from(cx, receiver)
            .and_then(|source| cx.ty(source))
            .is_some_and(|t| ef::is_queryable(cx.symbols, t));
        if !from_query {
            return vec![];
        }
        vec![cx.report(&PREMATURE_MATERIALIZATION, node, vec![cx.name(node).to_string()])]
    }
}

// LC003

static COUNT_INSTEAD_OF_ANY: RuleMeta = RuleMeta {
    id: "LC003",
    name: "count-instead-of-any",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Compares Count() with zero to test whether a query has rows",
    rationale: Some(
        "Count() makes the database count every matching row. Any() translates to EXISTS and \
         stops at the first match.",
    ),
    message: "Comparing '{0}()' with zero counts every matching row. Use 'Any()' to stop at the first match.",
    kinds: &[NodeKind::Binary],
    fix: Some(FixMeta {
        title: "Replace with Any()",
        safety: FixSafety::Safe,
    }),
};

/// `count OP literal` shapes meaning "at least one row"
const COUNT_ON_LEFT: &[(&str, &str)] = &[(">", "0"), (">=", "1"), ("!=", "0")];
/// `literal OP count` shapes meaning "at least one row"
const COUNT_ON_RIGHT: &[(&str, &str)] = &[("<", "0"), ("<=", "1"), ("!=", "0")];

pub struct CountInsteadOfAny;

impl CountInsteadOfAny {
    fn count_call(cx: &RuleContext<'_>, binary: NodeId) -> Option<NodeId> {
        let [left, right] = cx.tree.children(binary) else {
            return None;
        };
        let (left, right) = (
            cx.tree.unwrap_transparent(*left),
            cx.tree.unwrap_transparent(*right),
        );
        let op = cx.name(binary);
        let is_literal = |id: NodeId, text: &str| cx.kind(id) == NodeKind::Literal && cx.name(id) == text;

        let count = if COUNT_ON_LEFT.iter().any(|(o, lit)| *o == op && is_literal(right, lit)) {
            left
        } else if COUNT_ON_RIGHT.iter().any(|(o, lit)| *o == op && is_literal(left, lit)) {
            right
        } else {
            return None;
        };
        let counts = is_query_call_named(cx, count, &["Count", "LongCount"])
            && cx.tree.args(count).len() <= 1
            && cx.on_queryable(count);
        counts.then_some(count)
    }
}

impl Rule for CountInsteadOfAny {
    fn meta(&self) -> &'static RuleMeta {
        &COUNT_INSTEAD_OF_ANY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        match Self::count_call(cx, node) {
            Some(count) => vec![cx.report_span(
                &COUNT_INSTEAD_OF_ANY,
                node,
                vec![cx.name(count).to_string()],
            )],
            None => vec![],
        }
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let binary = diagnostic.node?;
        let count = Self::count_call(cx, binary)?;
        let mut any: NewNode = Template::copy(cx.tree, count).text("Any");
        any.symbol = None;
        any.ty = None;
        let title = COUNT_INSTEAD_OF_ANY.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Safe).replace(binary, any.build()))
    }
}

// LC004

static QUERY_AS_ENUMERABLE_PARAMETER: RuleMeta = RuleMeta {
    id: "LC004",
    name: "query-as-enumerable-parameter",
    severity: Severity::Info,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Passes a lazy query to a parameter typed as an in-memory sequence",
    rationale: Some(
        "Inside the callee the query is an IEnumerable: every operator it applies runs in \
         memory after all rows were loaded, and enumerating it twice runs it twice.",
    ),
    message: "A query is passed to '{0}' as IEnumerable parameter '{1}'. Operators applied there run in memory after loading every row.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct QueryAsEnumerableParameter;

impl Rule for QueryAsEnumerableParameter {
    fn meta(&self) -> &'static RuleMeta {
        &QUERY_AS_ENUMERABLE_PARAMETER
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(method) = cx.method(node) else {
            return vec![];
        };
        if method.kind != SymbolKind::Method || ef::is_query_operator(cx.symbols, method) {
            return vec![];
        }
        let arguments = walker::bound_arguments(cx.tree, cx.symbols, node);
        let mut found = Vec::new();
        for (arg, param) in arguments.iter().zip(&method.parameters) {
            if param.is_extension_receiver {
                continue;
            }
            let Some(param_ty) = param.ty else {
                continue;
            };
            let lazy_arg = cx
                .ty(cx.tree.unwrap_transparent(*arg))
                .is_some_and(|t| ef::is_queryable(cx.symbols, t));
            let eager_param =
                ef::is_enumerable(cx.symbols, param_ty) && !ef::is_queryable(cx.symbols, param_ty);
            if lazy_arg && eager_param {
                found.push(cx.report_span(
                    &QUERY_AS_ENUMERABLE_PARAMETER,
                    *arg,
                    vec![method.name.clone(), param.name.clone()],
                ));
            }
        }
        found
    }
}

// LC012

static REMOVE_RANGE_ON_QUERY: RuleMeta = RuleMeta {
    id: "LC012",
    name: "remove-range-on-query",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Deletes the rows of a query by loading and removing them one by one",
    rationale: Some(
        "RemoveRange on a query loads every matching entity, tracks it, and issues one DELETE \
         per row on SaveChanges. ExecuteDelete runs a single statement on the server.",
    ),
    message: "'{0}' is given a query, so every row is loaded and deleted one by one. Use 'ExecuteDelete()' to delete on the server.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Use ExecuteDelete()",
        safety: FixSafety::Unsafe,
    }),
};

const EXECUTE_DELETE_WARNING: &str =
    "// Warning: ExecuteDelete bypasses change tracking and cascades.\n";

pub struct RemoveRangeOnQuery;

impl RemoveRangeOnQuery {
    fn query_argument(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
        let arg = cx.tree.arg(call, 0)?;
        cx.ty(cx.tree.unwrap_transparent(arg))
            .is_some_and(|t| ef::is_queryable(cx.symbols, t))
            .then_some(arg)
    }
}

impl Rule for RemoveRangeOnQuery {
    fn meta(&self) -> &'static RuleMeta {
        &REMOVE_RANGE_ON_QUERY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if cx.name(node) != "RemoveRange"
            || !is_context_member(cx, node)
            || Self::query_argument(cx, node).is_none()
        {
            return vec![];
        }
        vec![cx.report(&REMOVE_RANGE_ON_QUERY, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let query = Self::query_argument(cx, call)?;
        let title = REMOVE_RANGE_ON_QUERY.fix.map(|f| f.title)?;
        let delete = Template::call(Some(Template::keep(query)), "ExecuteDelete", vec![]);

        let statement = cx
            .tree
            .parent(call)
            .filter(|&p| cx.kind(p) == NodeKind::ExprStmt);
        let rewrite = Rewrite::new(title, FixSafety::Unsafe);
        Some(match statement {
            Some(statement) => {
                let leading = format!(
                    "{}{}",
                    cx.tree.node(statement).trivia.leading,
                    EXECUTE_DELETE_WARNING
                );
                let replacement = NewNode::new(NodeKind::ExprStmt)
                    .leading(&leading)
                    .child(delete)
                    .build();
                rewrite.replace(statement, replacement)
            }
            None => rewrite.replace(call, delete),
        })
    }
}

// LC023

static PRIMARY_KEY_SCAN: RuleMeta = RuleMeta {
    id: "LC023",
    name: "primary-key-scan",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Looks up an entity by primary key with a predicate instead of Find",
    rationale: Some(
        "Find returns an already tracked entity without a database round trip. A predicate \
         query always goes to the database.",
    ),
    message: "Use 'Find' or 'FindAsync' instead of '{0}' when querying by primary key to leverage the change tracker cache",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Use Find()",
        safety: FixSafety::Safe,
    }),
};

const SINGLE_ROW_LOOKUPS: &[&str] = &["First", "FirstOrDefault", "Single", "SingleOrDefault"];

pub struct PrimaryKeyScan;

impl PrimaryKeyScan {
    /// Key value compared against the set's primary key in the predicate
    fn key_value(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
        if !SINGLE_ROW_LOOKUPS.contains(&sync_name(cx.name(call))) || !is_query_call(cx, call) {
            return None;
        }
        let set_ty = cx
            .receiver_type(call)
            .filter(|&t| ef::is_db_set(cx.symbols, t))?;
        let entity = ef::element_type(cx.symbols, set_ty)?;
        let key = ef::primary_key(cx.symbols, entity).and_then(|k| cx.symbols.symbol(k))?;

        let lambda = lambda_arg(cx, call)?;
        let param = cx.tree.lambda_param(lambda)?;
        let predicate = cx.tree.unwrap_transparent(cx.tree.lambda_result(lambda)?);
        if cx.kind(predicate) != NodeKind::Binary || cx.name(predicate) != "==" {
            return None;
        }
        let [left, right] = cx.tree.children(predicate) else {
            return None;
        };
        let is_key = |side: NodeId| {
            let side = cx.tree.unwrap_transparent(side);
            cx.kind(side) == NodeKind::MemberAccess
                && cx.name(side) == key.name
                && cx.tree.receiver(side).is_some_and(|r| refers_to(cx, r, param))
        };
        let value = if is_key(*left) {
            *right
        } else if is_key(*right) {
            *left
        } else {
            return None;
        };
        (!mentions(cx, value, param)).then_some(value)
    }
}

impl Rule for PrimaryKeyScan {
    fn meta(&self) -> &'static RuleMeta {
        &PRIMARY_KEY_SCAN
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        match Self::key_value(cx, node) {
            Some(_) => vec![cx.report(&PRIMARY_KEY_SCAN, node, vec![cx.name(node).to_string()])],
            None => vec![],
        }
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let value = Self::key_value(cx, call)?;
        // FindAsync takes the key values as an array when a token follows
        if cx.tree.args(call).len() != 1 {
            return None;
        }
        let find = if cx.name(call).ends_with("Async") {
            "FindAsync"
        } else {
            "Find"
        };
        let receiver = keep_receiver(cx, call)?;
        let title = PRIMARY_KEY_SCAN.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Safe).replace(
            call,
            Template::call(Some(receiver), find, vec![Template::keep(value)]),
        ))
    }
}

// LC029

static IDENTITY_SELECT: RuleMeta = RuleMeta {
    id: "LC029",
    name: "identity-select",
    severity: Severity::Warning,
    category: RuleCategory::Style,
    stability: RuleStability::Stable,
    description: "Projects every element onto itself",
    rationale: None,
    message: "The call to 'Select' is redundant because it uses an identity projection (x => x)",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Remove the identity Select",
        safety: FixSafety::Safe,
    }),
};

pub struct IdentitySelect;

impl Rule for IdentitySelect {
    fn meta(&self) -> &'static RuleMeta {
        &IDENTITY_SELECT
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_query_call_named(cx, node, &["Select"]) {
            return vec![];
        }
        let identity = lambda_arg(cx, node).is_some_and(|lambda| {
            match (cx.tree.lambda_param(lambda), cx.tree.lambda_result(lambda)) {
                (Some(param), Some(result)) => refers_to(cx, result, param),
                _ => false,
            }
        });
        if !identity {
            return vec![];
        }
        vec![cx.report(&IDENTITY_SELECT, node, vec![])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let receiver = keep_receiver(cx, call)?;
        let title = IDENTITY_SELECT.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Safe).replace(call, receiver))
    }
}

// LC031

static UNBOUNDED_MATERIALIZATION: RuleMeta = RuleMeta {
    id: "LC031",
    name: "unbounded-materialization",
    severity: Severity::Info,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Loads a whole mapped set without limiting the number of rows",
    rationale: Some(
        "A table that is small today grows. Bounding the query keeps memory use and response \
         time predictable.",
    ),
    message: "Query materializes from '{0}' without Take, First, or similar bounding. Consider adding Take(n) to prevent loading unbounded data.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct UnboundedMaterialization;

impl Rule for UnboundedMaterialization {
    fn meta(&self) -> &'static RuleMeta {
        &UNBOUNDED_MATERIALIZATION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_materializer(cx, node) {
            return vec![];
        }
        for upstream in walker::walk_upstream(cx.tree, cx.symbols, node).skip(1) {
            if cx.kind(upstream) == NodeKind::Call {
                let name = cx.name(upstream);
                if ef::is_one_of(name, ef::BOUNDING_METHODS)
                    || ef::is_one_of(name, ef::AGGREGATE_METHODS)
                    || is_materializer(cx, upstream)
                {
                    return vec![];
                }
                continue;
            }
            if cx.ty(upstream).is_some_and(|t| ef::is_db_set(cx.symbols, t)) {
                return vec![cx.report(
                    &UNBOUNDED_MATERIALIZATION,
                    node,
                    vec![cx.name(upstream).to_string()],
                )];
            }
        }
        vec![]
    }
}

// LC032

static MATERIALIZE_IN_PROJECTION: RuleMeta = RuleMeta {
    id: "LC032",
    name: "materialize-in-projection",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Materializes a nested collection inside a query projection",
    rationale: Some(
        "EF Core projects collection navigations natively. A ToList inside the projection can \
         force the projection to be evaluated on the client.",
    ),
    message: "'{0}' inside a Select projection forces client-side evaluation. Remove it; EF Core projects collections natively.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Remove the nested materialization",
        safety: FixSafety::Safe,
    }),
};

pub struct MaterializeInProjection;

impl Rule for MaterializeInProjection {
    fn meta(&self) -> &'static RuleMeta {
        &MATERIALIZE_IN_PROJECTION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !is_materializer(cx, node) || cx.name(node).ends_with("Async") {
            return vec![];
        }
        let in_projection = query_lambda_call(cx, node)
            .is_some_and(|call| matches!(cx.name(call), "Select" | "SelectMany"));
        if !in_projection {
            return vec![];
        }
        vec![cx.report(&MATERIALIZE_IN_PROJECTION, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let receiver = keep_receiver(cx, call)?;
        let title = MATERIALIZE_IN_PROJECTION.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Safe).replace(call, receiver))
    }
}
