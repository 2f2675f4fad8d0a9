//! Blocking calls and cancellation in asynchronous code

use super::{is_context_member, is_query_call, renamed_call};
use crate::diagnostic::{Diagnostic, FixSafety, Severity};
use crate::ef;
use crate::rewrite::{Edit, NewNode, Rewrite, Template};
use crate::rule::{FixMeta, Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::symbols::SymbolId;
use crate::tree::{NodeId, NodeKind};
use crate::walker;

// LC008

static SYNC_CALL_IN_ASYNC: RuleMeta = RuleMeta {
    id: "LC008",
    name: "sync-call-in-async",
    severity: Severity::Warning,
    category: RuleCategory::Perf,
    stability: RuleStability::Stable,
    description: "Calls a blocking EF Core method inside an async method",
    rationale: Some(
        "Avoid synchronous database blocking calls inside async methods. This leads to \
         thread pool starvation and reduced throughput.",
    ),
    message: "Calling synchronous '{0}' inside an async method blocks the thread. Use '{1}' and await it.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Await the async counterpart",
        safety: FixSafety::Safe,
    }),
};

pub struct SyncCallInAsync;

impl SyncCallInAsync {
    fn blocks(cx: &RuleContext<'_>, call: NodeId) -> bool {
        match cx.name(call) {
            "SaveChanges" => is_context_member(cx, call),
            "Find" => cx
                .receiver_type(call)
                .is_some_and(|t| ef::is_db_set(cx.symbols, t)),
            _ => is_query_call(cx, call) && cx.on_queryable(call),
        }
    }
}

impl Rule for SyncCallInAsync {
    fn meta(&self) -> &'static RuleMeta {
        &SYNC_CALL_IN_ASYNC
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(async_name) = ef::async_counterpart(cx.name(node)) else {
            return vec![];
        };
        if !Self::blocks(cx, node) {
            return vec![];
        }
        let in_async = cx
            .tree
            .enclosing_function(node)
            .is_some_and(|f| cx.tree.node(f).flags.is_async);
        if !in_async {
            return vec![];
        }
        vec![cx.report(
            &SYNC_CALL_IN_ASYNC,
            node,
            vec![cx.name(node).to_string(), async_name],
        )]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let async_name = diagnostic.args.get(1)?;
        let title = SYNC_CALL_IN_ASYNC.fix.map(|f| f.title)?;
        let awaited = Template::await_expr(renamed_call(cx, call, async_name));
        // `await` binds looser than member access
        let replacement = if walker::downstream(cx.tree, cx.symbols, call).is_some() {
            NewNode::new(NodeKind::Parenthesized).child(awaited).build()
        } else {
            awaited
        };
        Some(Rewrite::new(title, FixSafety::Safe).replace(call, replacement))
    }
}

// LC026

static MISSING_CANCELLATION_TOKEN: RuleMeta = RuleMeta {
    id: "LC026",
    name: "missing-cancellation-token",
    severity: Severity::Warning,
    category: RuleCategory::Suspicious,
    stability: RuleStability::Stable,
    description: "Calls an async EF Core method without a cancellation token",
    rationale: Some(
        "Always pass a CancellationToken to EF Core async operations to prevent resource \
         waste when requests are cancelled.",
    ),
    message: "The async method '{0}' is called without a CancellationToken. Pass a token to ensure the query can be cancelled.",
    kinds: &[NodeKind::Call],
    fix: Some(FixMeta {
        title: "Pass the cancellation token in scope",
        safety: FixSafety::Safe,
    }),
};

const TOKEN_NAMES: &[&str] = &["cancellationToken", "ct"];

pub struct MissingCancellationToken;

impl MissingCancellationToken {
    /// Index of the token parameter, counting an extension receiver
    fn token_parameter(cx: &RuleContext<'_>, call: NodeId) -> Option<usize> {
        let method = cx.method(call)?;
        if !cx.name(call).ends_with("Async") || !ef::is_ef_method(cx.symbols, method) {
            return None;
        }
        method
            .parameters
            .iter()
            .position(|p| p.ty.is_some_and(|t| ef::is_cancellation_token(cx.symbols, t)))
    }

    /// `default`, `default(CancellationToken)`, or `CancellationToken.None`
    fn is_default_token(cx: &RuleContext<'_>, arg: NodeId) -> bool {
        let arg = cx.tree.unwrap_transparent(arg);
        match cx.kind(arg) {
            NodeKind::Literal => cx.name(arg) == "default",
            NodeKind::Call => cx.name(arg) == "default",
            NodeKind::MemberAccess => {
                cx.name(arg) == "None"
                    && cx
                        .tree
                        .receiver(arg)
                        .is_some_and(|r| cx.name(r) == "CancellationToken")
            }
            _ => false,
        }
    }

    /// Token parameter or local visible at `call`, preferring the
    /// conventional names
    fn token_in_scope(cx: &RuleContext<'_>, call: NodeId) -> Option<(NodeId, SymbolId)> {
        let method = cx.tree.enclosing_method(call)?;
        let before = cx.tree.span(call).start;
        let candidates: Vec<(NodeId, SymbolId)> = cx
            .tree
            .descendants(method)
            .filter(|&n| match cx.kind(n) {
                NodeKind::Parameter => cx.tree.parent(n) == Some(method),
                NodeKind::LocalDecl => cx.tree.span(n).end <= before,
                _ => false,
            })
            .filter_map(|n| {
                let symbol = cx.tree.node(n).symbol?;
                let ty = cx.symbols.symbol(symbol)?.ty?;
                ef::is_cancellation_token(cx.symbols, ty).then_some((n, symbol))
            })
            .collect();
        TOKEN_NAMES
            .iter()
            .find_map(|name| candidates.iter().copied().find(|&(n, _)| cx.name(n) == *name))
            .or_else(|| candidates.first().copied())
    }
}

impl Rule for MissingCancellationToken {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_CANCELLATION_TOKEN
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some(index) = Self::token_parameter(cx, node) else {
            return vec![];
        };
        let missing = match cx.bound_arg(node, index) {
            None => true,
            Some(arg) => Self::is_default_token(cx, arg),
        };
        if !missing {
            return vec![];
        }
        vec![cx.report(&MISSING_CANCELLATION_TOKEN, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let call = diagnostic.node?;
        let index = Self::token_parameter(cx, call)?;
        let (declaration, symbol) = Self::token_in_scope(cx, call)?;
        let title = MISSING_CANCELLATION_TOKEN.fix.map(|f| f.title)?;
        let token = NewNode::new(NodeKind::Identifier)
            .text(cx.name(declaration))
            .bind(symbol)
            .typed(cx.symbols.symbol(symbol).and_then(|s| s.ty))
            .build();

        let bound = walker::bound_arguments(cx.tree, cx.symbols, call);
        let rewrite = Rewrite::new(title, FixSafety::Safe);
        match bound.get(index) {
            Some(&arg) => Some(rewrite.replace(arg, token)),
            // Appending only lines up with the parameter when nothing before it is omitted
            None if bound.len() == index => Some(rewrite.edit(Edit::Append {
                parent: call,
                node: token,
            })),
            None => None,
        }
    }
}
