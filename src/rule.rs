//! Rule definition: static metadata, the detection trait, and the per-unit context

use crate::diagnostic::{format_message, Diagnostic, FixSafety, Severity};
use crate::document::Unit;
use crate::rewrite::Rewrite;
use crate::symbols::{Symbol, SymbolTable, TypeId};
use crate::tree::{NodeId, NodeKind, Tree};
use crate::walker;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule category for grouping related rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    /// Code that is definitely wrong
    Correctness,
    /// Code that is likely wrong or surprising at runtime
    Suspicious,
    #[default]
    Style,
    /// Extra round trips, over-fetching, blocking
    Perf,
    /// Strict rules that may have false positives
    Pedantic,
    /// Rules that ban specific operators
    Restriction,
    /// Rules under development
    Nursery,
}

impl RuleCategory {
    pub const ALL: &'static [RuleCategory] = &[
        RuleCategory::Correctness,
        RuleCategory::Suspicious,
        RuleCategory::Style,
        RuleCategory::Perf,
        RuleCategory::Pedantic,
        RuleCategory::Restriction,
        RuleCategory::Nursery,
    ];
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCategory::Correctness => write!(f, "correctness"),
            RuleCategory::Suspicious => write!(f, "suspicious"),
            RuleCategory::Style => write!(f, "style"),
            RuleCategory::Perf => write!(f, "perf"),
            RuleCategory::Pedantic => write!(f, "pedantic"),
            RuleCategory::Restriction => write!(f, "restriction"),
            RuleCategory::Nursery => write!(f, "nursery"),
        }
    }
}

impl std::str::FromStr for RuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "correctness" => Ok(RuleCategory::Correctness),
            "suspicious" => Ok(RuleCategory::Suspicious),
            "style" => Ok(RuleCategory::Style),
            "perf" | "performance" => Ok(RuleCategory::Perf),
            "pedantic" => Ok(RuleCategory::Pedantic),
            "restriction" => Ok(RuleCategory::Restriction),
            "nursery" | "experimental" => Ok(RuleCategory::Nursery),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// Rule stability level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStability {
    #[default]
    Stable,
    /// Opt-in through `preview: true` or an explicit selection
    Preview,
    Deprecated,
}

impl fmt::Display for RuleStability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStability::Stable => write!(f, "stable"),
            RuleStability::Preview => write!(f, "preview"),
            RuleStability::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// Rewrite a rule can offer
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FixMeta {
    pub title: &'static str,
    pub safety: FixSafety,
}

/// Static description of a rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleMeta {
    /// Stable identifier, e.g. `LC003`
    pub id: &'static str,
    /// Kebab-case name
    pub name: &'static str,
    pub severity: Severity,
    pub category: RuleCategory,
    pub stability: RuleStability,
    pub description: &'static str,
    pub rationale: Option<&'static str>,
    /// Message template with `{0}`, `{1}` placeholders
    pub message: &'static str,
    /// Node kinds the rule's callback subscribes to
    pub kinds: &'static [NodeKind],
    pub fix: Option<FixMeta>,
}

impl RuleMeta {
    pub fn is_preview(&self) -> bool {
        self.stability == RuleStability::Preview
    }

    pub fn is_fixable(&self) -> bool {
        self.fix.is_some()
    }
}

/// A detector, optionally paired with a rewrite
///
/// `check` is called once per node of a subscribed kind. It must be a pure
/// function of the node and the unit: inputs outside the expected shape,
/// or that fail to resolve, yield no diagnostic.
pub trait Rule: Send + Sync {
    fn meta(&self) -> &'static RuleMeta;

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic>;

    /// Rewrite for one of this rule's diagnostics
    fn fix(&self, _cx: &RuleContext<'_>, _diagnostic: &Diagnostic) -> Option<Rewrite> {
        None
    }
}

/// Read-only view of one unit handed to rule callbacks
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub unit: &'a Unit,
    pub tree: &'a Tree,
    pub symbols: &'a SymbolTable,
}

impl<'a> RuleContext<'a> {
    pub fn new(unit: &'a Unit) -> Self {
        Self {
            unit,
            tree: &unit.tree,
            symbols: &unit.symbols,
        }
    }

    /// Diagnostic for `meta` at the name token of `at`
    pub fn report(&self, meta: &RuleMeta, at: NodeId, args: Vec<String>) -> Diagnostic {
        let message = format_message(meta.message, &args);
        Diagnostic::new(meta.id, meta.severity, &message, self.unit.location(at))
            .with_args(args)
            .with_node(at)
    }

    /// Same as [`report`](Self::report), located on the whole node
    pub fn report_span(&self, meta: &RuleMeta, at: NodeId, args: Vec<String>) -> Diagnostic {
        let mut diagnostic = self.report(meta, at, args);
        diagnostic.location = self.unit.full_location(at);
        diagnostic
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.tree.kind(id)
    }

    pub fn name(&self, id: NodeId) -> &'a str {
        self.tree.text(id)
    }

    /// Symbol bound to a node
    pub fn symbol(&self, id: NodeId) -> Option<&'a Symbol> {
        self.tree.node(id).symbol.and_then(|s| self.symbols.symbol(s))
    }

    /// Method bound to a call node
    pub fn method(&self, call: NodeId) -> Option<&'a Symbol> {
        crate::ef::method_of(self.tree, self.symbols, call)
    }

    pub fn ty(&self, id: NodeId) -> Option<TypeId> {
        self.tree.node(id).ty
    }

    /// Semantic receiver of a call or member access, unwrapped
    pub fn receiver(&self, id: NodeId) -> Option<NodeId> {
        walker::receiver_of(self.tree, self.symbols, id).map(|r| self.tree.unwrap_transparent(r))
    }

    pub fn receiver_type(&self, id: NodeId) -> Option<TypeId> {
        self.receiver(id).and_then(|r| self.ty(r))
    }

    /// Whether the receiver of `id` is a lazy query
    pub fn on_queryable(&self, id: NodeId) -> bool {
        self.receiver_type(id)
            .is_some_and(|t| crate::ef::is_queryable(self.symbols, t))
    }

    /// Bound argument `index` (extension receivers count as argument 0)
    pub fn bound_arg(&self, call: NodeId, index: usize) -> Option<NodeId> {
        walker::bound_arguments(self.tree, self.symbols, call)
            .get(index)
            .copied()
    }

    /// Written arguments, unwrapped
    pub fn args(&self, call: NodeId) -> Vec<NodeId> {
        self.tree
            .args(call)
            .iter()
            .map(|&a| self.tree.unwrap_transparent(a))
            .collect()
    }

    /// Nearest enclosing lambda and the call it is an argument of
    pub fn enclosing_lambda_call(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        let lambda = self.tree.nearest(id, &[NodeKind::Lambda])?;
        let mut current = lambda;
        while let Some(parent) = self.tree.parent(current) {
            match self.tree.kind(parent) {
                NodeKind::Conversion | NodeKind::DelegateCreation | NodeKind::Parenthesized => {
                    current = parent;
                }
                NodeKind::Call => return Some((lambda, parent)),
                _ => return None,
            }
        }
        None
    }

    /// Whether `id` sits inside a lambda passed to a call on a lazy query
    pub fn in_query_lambda(&self, id: NodeId) -> Option<NodeId> {
        let (_, call) = self.enclosing_lambda_call(id)?;
        self.on_queryable(call).then_some(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testing::World;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_category_round_trip() {
        for category in RuleCategory::ALL {
            assert_eq!(category.to_string().parse::<RuleCategory>(), Ok(*category));
        }
        assert_eq!("performance".parse::<RuleCategory>(), Ok(RuleCategory::Perf));
        assert!("speed".parse::<RuleCategory>().is_err());
    }

    #[test]
    fn test_report_formats_message_and_location() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let count = w.queryable_call(users, "Count", vec![]);
        let unit = w.finish_expr(count);
        let cx = RuleContext::new(&unit);

        let meta = Registry::global().get("LC007").unwrap().meta();
        let diag = cx.report(meta, count, vec!["Count".to_string()]);
        assert_eq!(diag.rule_id, "LC007");
        assert!(diag.message.contains("'Count'"));
        assert_eq!(diag.node, Some(count));
        assert_eq!(diag.location.length, "Count".len());
        assert_eq!(cx.receiver(count), Some(users));
        assert!(cx.on_queryable(count));
    }

    #[test]
    fn test_enclosing_lambda_call() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let filtered = w.where_call(users);
        let unit = w.finish_expr(filtered);
        let cx = RuleContext::new(&unit);

        let lambda = unit.tree.arg(filtered, 0).unwrap();
        let body = unit.tree.lambda_result(lambda).unwrap();
        assert_eq!(cx.enclosing_lambda_call(body), Some((lambda, filtered)));
        assert_eq!(cx.in_query_lambda(body), Some(filtered));
        assert_eq!(cx.in_query_lambda(filtered), None);
    }
}
