//! Expressions inside query lambdas that the provider cannot translate,
//! or translates poorly

use super::{
    is_query_call, keep_receiver, query_lambda_call, refers_to, renamed_call, statement_in_block,
};
use crate::diagnostic::{Diagnostic, FixSafety, Severity};
use crate::ef;
use crate::rewrite::{Edit, NameScope, Rewrite, Template};
use crate::rule::{FixMeta, Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::symbols::SymbolKind;
use crate::tree::{NodeId, NodeKind};

// LC001

static LOCAL_METHOD_IN_QUERY: RuleMeta = RuleMeta {
    id: "LC001",
    name: "local-method-in-query",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Calls a method declared in this code base inside a query expression",
    rationale: Some(
        "The query provider only understands its own operators. A call to one of your methods \
         either throws at runtime or silently moves evaluation to the client.",
    ),
    message: "Method '{0}' cannot be translated to SQL. The query will fail or be evaluated on the client.",
    kinds: &[NodeKind::Call],
    fix: None,
};

pub struct LocalMethodInQuery;

impl Rule for LocalMethodInQuery {
    fn meta(&self) -> &'static RuleMeta {
        &LOCAL_METHOD_IN_QUERY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(method) = cx.method(node) else {
            return vec![];
        };
        let declared_here = method
            .declaration
            .is_some_and(|d| cx.tree.contains(d));
        if method.kind != SymbolKind::Method || !declared_here || is_query_call(cx, node) {
            return vec![];
        }
        if query_lambda_call(cx, node).is_none() {
            return vec![];
        }
        vec![cx.report(&LOCAL_METHOD_IN_QUERY, node, vec![method.name.clone()])]
    }
}

// LC014

static CASE_CONVERSION_IN_QUERY: RuleMeta = RuleMeta {
    id: "LC014",
    name: "case-conversion-in-query",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Uses ToLower/ToUpper to compare strings inside a query",
    rationale: Some(
        "Converting a column's case on the server prevents the database from using an index \
         on it. Compare case-insensitively instead.",
    ),
    message: "'{0}' inside a query prevents index use on the column. Use 'string.Equals' with 'StringComparison.OrdinalIgnoreCase' or a case-insensitive collation.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Compare with string.Equals ignoring case",
        safety: FixSafety::Safe,
    }),
};

const CASE_CONVERSIONS: &[&str] = &["ToLower", "ToUpper", "ToLowerInvariant", "ToUpperInvariant"];

pub struct CaseConversionInQuery;

impl CaseConversionInQuery {
    fn is_case_conversion(cx: &RuleContext<'_>, call: NodeId) -> bool {
        if cx.kind(call) != NodeKind::Call || !CASE_CONVERSIONS.contains(&cx.name(call)) {
            return false;
        }
        let on_string = cx
            .method(call)
            .and_then(|m| m.containing_type)
            .or_else(|| cx.receiver_type(call))
            .is_some_and(|t| ef::is_string(cx.symbols, t));
        on_string && cx.tree.receiver(call).is_some()
    }

    /// The operand with any case conversion removed
    fn stripped(cx: &RuleContext<'_>, operand: NodeId) -> Template {
        let inner = cx.tree.unwrap_transparent(operand);
        if Self::is_case_conversion(cx, inner) {
            if let Some(receiver) = cx.tree.receiver(inner) {
                return Template::keep(receiver);
            }
        }
        Template::keep(operand)
    }

    fn string_equals(left: Template, right: Template) -> Template {
        let mode = Template::member(Template::type_name("StringComparison"), "OrdinalIgnoreCase");
        Template::call(
            Some(Template::type_name("string")),
            "Equals",
            vec![left, right, mode],
        )
    }
}

impl Rule for CaseConversionInQuery {
    fn meta(&self) -> &'static RuleMeta {
        &CASE_CONVERSION_IN_QUERY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !Self::is_case_conversion(cx, node) || query_lambda_call(cx, node).is_none() {
            return vec![];
        }
        vec![cx.report(&CASE_CONVERSION_IN_QUERY, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let mut outer = call;
        while let Some(parent) = cx.tree.parent(outer) {
            if cx.kind(parent) != NodeKind::Parenthesized {
                break;
            }
            outer = parent;
        }
        let parent = cx.tree.parent(outer)?;
        let title = CASE_CONVERSION_IN_QUERY.fix.map(|f| f.title)?;

        let replacement = match cx.kind(parent) {
            NodeKind::Binary if matches!(cx.name(parent), "==" | "!=") => {
                let [left, right] = cx.tree.children(parent) else {
                    return None;
                };
                let equals = Self::string_equals(Self::stripped(cx, *left), Self::stripped(cx, *right));
                if cx.name(parent) == "!=" {
                    Template::unary("!", equals)
                } else {
                    equals
                }
            }
            NodeKind::Call
                if cx.name(parent) == "Equals"
                    && cx.tree.receiver(parent) == Some(outer)
                    && cx.tree.args(parent).len() == 1 =>
            {
                let subject = Template::keep(cx.tree.receiver(call)?);
                let other = Self::stripped(cx, cx.tree.arg(parent, 0)?);
                Self::string_equals(subject, other)
            }
            _ => return None,
        };
        Some(Rewrite::new(title, FixSafety::Safe).replace(parent, replacement))
    }
}

// LC016

static CLOCK_IN_QUERY: RuleMeta = RuleMeta {
    id: "LC016",
    name: "clock-in-query",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Reads DateTime.Now or UtcNow inside a query expression",
    rationale: Some(
        "A clock read inside the query is evaluated per row by the database, or makes every \
         execution a different query plan. Capture the value in a local first.",
    ),
    message: "'{0}' is read inside a query. Capture it in a local variable so the query is parameterized.",
    kinds: &[NodeKind::MemberAccess],
    fix: Some(FixMeta {
        title: "Capture the clock value in a local",
        safety: FixSafety::Safe,
    }),
};

const CLOCK_TYPES: &[&str] = &["DateTime", "DateTimeOffset"];
const CLOCK_PROPERTIES: &[&str] = &["Now", "UtcNow", "Today"];

pub struct ClockInQuery;

impl ClockInQuery {
    fn is_clock_read(cx: &RuleContext<'_>, node: NodeId) -> bool {
        if cx.kind(node) != NodeKind::MemberAccess || !CLOCK_PROPERTIES.contains(&cx.name(node)) {
            return false;
        }
        if let Some(symbol) = cx.symbol(node) {
            return symbol.is_static
                && CLOCK_TYPES
                    .iter()
                    .any(|ty| ef::containing_type_is(cx.symbols, symbol, ty, ef::SYSTEM));
        }
        cx.tree
            .receiver(node)
            .map(|r| cx.tree.unwrap_transparent(r))
            .is_some_and(|r| cx.kind(r) == NodeKind::TypeName && CLOCK_TYPES.contains(&cx.name(r)))
    }

    fn local_base(property: &str) -> &'static str {
        match property {
            "UtcNow" => "utcNow",
            "Today" => "today",
            _ => "now",
        }
    }
}

impl Rule for ClockInQuery {
    fn meta(&self) -> &'static RuleMeta {
        &CLOCK_IN_QUERY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !Self::is_clock_read(cx, node) || query_lambda_call(cx, node).is_none() {
            return vec![];
        }
        let shown = cx.tree.source_of(node).to_string();
        vec![cx.report(&CLOCK_IN_QUERY, node, vec![shown])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let read = diagnostic.node?;
        let (statement, block) = statement_in_block(cx.tree, read)?;
        let title = CLOCK_IN_QUERY.fix.map(|f| f.title)?;

        // Earlier reads in the same statement get the earlier names, so
        // fixes for sibling reads batch without colliding.
        let mut names = NameScope::for_scope(cx.tree, block);
        let mut name = String::new();
        for other in cx.tree.descendants(statement) {
            if !Self::is_clock_read(cx, other) || query_lambda_call(cx, other).is_none() {
                continue;
            }
            name = names.fresh(Self::local_base(cx.name(other)));
            if other == read {
                break;
            }
        }

        let capture = Template::local(&name, Template::keep(read));
        Some(
            Rewrite::new(title, FixSafety::Safe)
                .edit(Edit::InsertBefore {
                    anchor: statement,
                    node: capture,
                })
                .replace(read, Template::ident(&name)),
        )
    }
}

// LC018

static RAW_SQL_INTERPOLATION: RuleMeta = RuleMeta {
    id: "LC018",
    name: "raw-sql-interpolation",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Passes an interpolated or concatenated string to a raw SQL method",
    rationale: Some(
        "Values spliced into the SQL text are not sent as parameters, which opens the query \
         to SQL injection.",
    ),
    message: "'{0}' is given an interpolated or concatenated string. Use 'FromSqlInterpolated' or parameters to prevent SQL injection.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Use the interpolated SQL method",
        safety: FixSafety::Safe,
    }),
};

const RAW_SQL_METHODS: &[(&str, &str)] = &[
    ("FromSqlRaw", "FromSqlInterpolated"),
    ("ExecuteSqlRaw", "ExecuteSqlInterpolated"),
    ("ExecuteSqlRawAsync", "ExecuteSqlInterpolatedAsync"),
];

pub struct RawSqlInterpolation;

impl RawSqlInterpolation {
    fn sql_argument(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
        let method = cx.method(call)?;
        let arg = if method.is_extension {
            cx.bound_arg(call, 1)?
        } else {
            cx.tree.arg(call, 0)?
        };
        Some(cx.tree.unwrap_transparent(arg))
    }

    fn is_constant(cx: &RuleContext<'_>, id: NodeId) -> bool {
        let id = cx.tree.unwrap_transparent(id);
        match cx.kind(id) {
            NodeKind::Literal => true,
            NodeKind::Identifier | NodeKind::MemberAccess => cx.symbol(id).is_some_and(|s| s.is_const),
            NodeKind::Binary if cx.name(id) == "+" => {
                cx.tree.children(id).iter().all(|&c| Self::is_constant(cx, c))
            }
            _ => false,
        }
    }

    fn is_spliced(cx: &RuleContext<'_>, id: NodeId) -> bool {
        match cx.kind(id) {
            NodeKind::InterpolatedString => cx.name(id).contains('{'),
            NodeKind::Binary if cx.name(id) == "+" => !Self::is_constant(cx, id),
            _ => false,
        }
    }
}

impl Rule for RawSqlInterpolation {
    fn meta(&self) -> &'static RuleMeta {
        &RAW_SQL_INTERPOLATION
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let name = cx.name(node);
        if !RAW_SQL_METHODS.iter().any(|(raw, _)| *raw == name) {
            return vec![];
        }
        if !cx.method(node).is_some_and(|m| ef::is_ef_method(cx.symbols, m)) {
            return vec![];
        }
        match Self::sql_argument(cx, node) {
            Some(sql) if Self::is_spliced(cx, sql) => {
                vec![cx.report(&RAW_SQL_INTERPOLATION, node, vec![name.to_string()])]
            }
            _ => vec![],
        }
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        // Concatenations have no parameterized spelling to switch to.
        let sql = Self::sql_argument(cx, call)?;
        if cx.kind(sql) != NodeKind::InterpolatedString {
            return None;
        }
        let (_, interpolated) = RAW_SQL_METHODS
            .iter()
            .find(|(raw, _)| *raw == cx.name(call))?;
        let title = RAW_SQL_INTERPOLATION.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Safe).replace(call, renamed_call(cx, call, interpolated)))
    }
}

// LC020

static STRING_COMPARISON_IN_QUERY: RuleMeta = RuleMeta {
    id: "LC020",
    name: "string-comparison-in-query",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Passes a StringComparison to Contains/StartsWith/EndsWith inside a query",
    rationale: Some(
        "The overloads taking a StringComparison have no SQL translation. Depending on the \
         provider the query throws or is evaluated on the client. Case sensitivity is decided \
         by the column collation.",
    ),
    message: "'{0}' with a StringComparison argument cannot be translated to SQL and may cause client-side evaluation.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Remove the StringComparison argument",
        safety: FixSafety::Safe,
    }),
};

const COMPARING_METHODS: &[&str] = &["Contains", "StartsWith", "EndsWith"];

pub struct StringComparisonInQuery;

impl StringComparisonInQuery {
    fn comparison_arg(cx: &RuleContext<'_>, call: NodeId) -> Option<NodeId> {
        cx.tree.args(call).iter().copied().find(|&arg| {
            let inner = cx.tree.unwrap_transparent(arg);
            let typed = cx
                .ty(inner)
                .and_then(|t| cx.symbols.ty(t))
                .is_some_and(|t| t.is("StringComparison", ef::SYSTEM));
            let spelled = cx.kind(inner) == NodeKind::MemberAccess
                && cx
                    .tree
                    .receiver(inner)
                    .is_some_and(|r| cx.kind(r) == NodeKind::TypeName && cx.name(r) == "StringComparison");
            typed || spelled
        })
    }
}

impl Rule for StringComparisonInQuery {
    fn meta(&self) -> &'static RuleMeta {
        &STRING_COMPARISON_IN_QUERY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if !COMPARING_METHODS.contains(&cx.name(node)) {
            return vec![];
        }
        let on_string = cx
            .method(node)
            .and_then(|m| m.containing_type)
            .or_else(|| cx.receiver_type(node))
            .is_some_and(|t| ef::is_string(cx.symbols, t));
        if !on_string
            || Self::comparison_arg(cx, node).is_none()
            || query_lambda_call(cx, node).is_none()
        {
            return vec![];
        }
        vec![cx.report(&STRING_COMPARISON_IN_QUERY, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let arg = Self::comparison_arg(cx, call)?;
        let title = STRING_COMPARISON_IN_QUERY.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Safe).remove(arg))
    }
}

// LC021

static IGNORE_QUERY_FILTERS: RuleMeta = RuleMeta {
    id: "LC021",
    name: "ignore-query-filters",
    severity: Severity::Warning,
    category: RuleCategory::Restriction,
    stability: RuleStability::Stable,
    description: "Calls IgnoreQueryFilters",
    rationale: Some(
        "Global query filters usually implement multi-tenancy or soft delete. Bypassing them \
         can leak rows across tenants or resurrect deleted data.",
    ),
    message: "Usage of 'IgnoreQueryFilters' can bypass critical global filters like multi-tenancy or soft-delete. Ensure this is intentional.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Remove IgnoreQueryFilters()",
        safety: FixSafety::Unsafe,
    }),
};

pub struct IgnoreQueryFilters;

impl Rule for IgnoreQueryFilters {
    fn meta(&self) -> &'static RuleMeta {
        &IGNORE_QUERY_FILTERS
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if cx.name(node) != "IgnoreQueryFilters"
            || !cx.method(node).is_some_and(|m| ef::is_ef_method(cx.symbols, m))
        {
            return vec![];
        }
        vec![cx.report(&IGNORE_QUERY_FILTERS, node, vec![])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let receiver = keep_receiver(cx, call)?;
        let title = IGNORE_QUERY_FILTERS.fix.map(|f| f.title)?;
        Some(Rewrite::new(title, FixSafety::Unsafe).replace(call, receiver))
    }
}

// LC024

static GROUP_ELEMENT_ACCESS: RuleMeta = RuleMeta {
    id: "LC024",
    name: "group-element-access",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Projects the elements of a server-side group instead of its key and aggregates",
    rationale: Some(
        "A GroupBy translated to SQL yields only the key and aggregate values. Touching the \
         group's elements in the projection cannot be translated.",
    ),
    message: "Accessing group elements with '{0}' cannot be translated to SQL. Use only Key and aggregate functions (Count, Sum, Average, Min, Max).",
    kinds: &[NodeKind::Call],
    fix: None,
};

const GROUP_AGGREGATES: &[&str] = &[
    "Count",
    "LongCount",
    "Sum",
    "Average",
    "Min",
    "Max",
    "CountAsync",
    "LongCountAsync",
    "SumAsync",
    "AverageAsync",
    "MinAsync",
    "MaxAsync",
];

pub struct GroupElementAccess;

impl GroupElementAccess {
    /// Offending node and the name to report for one use of the group parameter
    fn misuse(cx: &RuleContext<'_>, reference: NodeId) -> Option<(NodeId, String)> {
        let mut at = reference;
        while let Some(parent) = cx.tree.parent(at) {
            if !matches!(
                cx.kind(parent),
                NodeKind::Parenthesized | NodeKind::Conversion
            ) {
                break;
            }
            at = parent;
        }
        let direct = || Some((reference, "direct access".to_string()));
        let Some(parent) = cx.tree.parent(at) else {
            return direct();
        };
        match cx.kind(parent) {
            NodeKind::MemberAccess if cx.name(parent) == "Key" => None,
            NodeKind::Call if cx.receiver(parent) == Some(reference) => {
                if GROUP_AGGREGATES.contains(&cx.name(parent)) {
                    None
                } else {
                    Some((parent, cx.name(parent).to_string()))
                }
            }
            _ => direct(),
        }
    }
}

impl Rule for GroupElementAccess {
    fn meta(&self) -> &'static RuleMeta {
        &GROUP_ELEMENT_ACCESS
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if cx.name(node) != "Select" || !is_query_call(cx, node) || !cx.on_queryable(node) {
            return vec![];
        }
        let grouped = cx
            .receiver_type(node)
            .and_then(|t| ef::element_type(cx.symbols, t))
            .is_some_and(|t| ef::is_grouping(cx.symbols, t));
        if !grouped {
            return vec![];
        }
        let Some(lambda) = super::lambda_arg(cx, node) else {
            return vec![];
        };
        let (Some(param), Some(body)) = (cx.tree.lambda_param(lambda), cx.tree.body(lambda)) else {
            return vec![];
        };

        cx.tree
            .descendants(body)
            .filter(|&n| refers_to(cx, n, param))
            .filter_map(|reference| Self::misuse(cx, reference))
            .map(|(at, name)| cx.report(&GROUP_ELEMENT_ACCESS, at, vec![name]))
            .collect()
    }
}
