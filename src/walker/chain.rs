//! Upstream receiver-chain walking
//!
//! Starting at a node, the walk follows "receiver" edges toward the
//! expression a fluent chain was ultimately invoked on:
//!
//! ```text
//! db.Users.Where(p).OrderBy(k).ToList()
//!   ToList -> OrderBy -> Where -> db.Users -> db   (root)
//! ```
//!
//! Conversions, parentheses, and delegate wrappers are unwrapped at every
//! step and never yielded.

use crate::symbols::{SymbolKind, SymbolTable};
use crate::tree::{NodeId, NodeKind, Tree};

/// Collection types whose sequence constructor copies (materializes) its argument
const MATERIALIZING_CONSTRUCTORS: &[&str] = &[
    "List",
    "HashSet",
    "Dictionary",
    "SortedDictionary",
    "SortedList",
    "SortedSet",
    "LinkedList",
    "Queue",
    "Stack",
];

const COLLECTIONS_NAMESPACE: &str = "System.Collections.Generic";

/// Lazy upstream walk from a node; see [`walk_upstream`]
pub struct Upstream<'a> {
    tree: &'a Tree,
    symbols: &'a SymbolTable,
    next: Option<NodeId>,
    remaining: usize,
}

impl Iterator for Upstream<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next.take()?;
        // Receivers are always strict descendants, so the walk is bounded
        // by the tree size even for a malformed receiver relation.
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.next = receiver_of(self.tree, self.symbols, current)
            .map(|r| self.tree.unwrap_transparent(r));
        Some(current)
    }
}

/// Walk from `node` toward the root of its receiver chain
///
/// The first item is `node` itself (unwrapped); the last is the root.
pub fn walk_upstream<'a>(tree: &'a Tree, symbols: &'a SymbolTable, node: NodeId) -> Upstream<'a> {
    Upstream {
        tree,
        symbols,
        next: Some(tree.unwrap_transparent(node)),
        remaining: tree.len(),
    }
}

/// The final node of an upstream walk
pub fn chain_root(tree: &Tree, symbols: &SymbolTable, node: NodeId) -> NodeId {
    walk_upstream(tree, symbols, node)
        .last()
        .unwrap_or(node)
}

/// The receiver-equivalent of one node, or `None` at a chain root
pub fn receiver_of(tree: &Tree, symbols: &SymbolTable, id: NodeId) -> Option<NodeId> {
    let node = tree.node(id);
    match node.kind {
        NodeKind::Call => {
            let symbol = node.symbol.and_then(|s| symbols.symbol(s));
            match symbol {
                Some(method) if method.is_extension => bound_arguments(tree, symbols, id).first().copied(),
                Some(method) if method.is_static => None,
                _ => syntactic_instance(tree, id),
            }
        }
        NodeKind::MemberAccess => syntactic_instance(tree, id),
        NodeKind::ObjectCreation if is_materializing_constructor(tree, symbols, id) => {
            tree.arg(id, 0)
        }
        _ => None,
    }
}

/// Receiver child, unless it names a type (static access)
fn syntactic_instance(tree: &Tree, id: NodeId) -> Option<NodeId> {
    tree.receiver(id)
        .filter(|&r| tree.kind(tree.unwrap_transparent(r)) != NodeKind::TypeName)
}

/// Arguments in parameter order. An extension call written in receiver
/// form binds its receiver to the first parameter.
pub fn bound_arguments(tree: &Tree, symbols: &SymbolTable, call: NodeId) -> Vec<NodeId> {
    let node = tree.node(call);
    let extension = node
        .symbol
        .and_then(|s| symbols.symbol(s))
        .is_some_and(|s| s.is_extension);
    let mut args = Vec::with_capacity(node.children.len());
    if extension {
        args.extend(syntactic_instance(tree, call));
    }
    args.extend_from_slice(tree.args(call));
    args
}

/// `new List<T>(seq)` and friends: a copy of an existing sequence
pub fn is_materializing_constructor(tree: &Tree, symbols: &SymbolTable, id: NodeId) -> bool {
    let Some(ctor) = tree.node(id).symbol.and_then(|s| symbols.symbol(s)) else {
        return false;
    };
    if ctor.kind != SymbolKind::Constructor || tree.args(id).is_empty() {
        return false;
    }
    let Some(owner) = ctor.containing_type.and_then(|t| symbols.ty(t)) else {
        return false;
    };
    if owner.namespace != COLLECTIONS_NAMESPACE
        || !MATERIALIZING_CONSTRUCTORS.contains(&owner.name.as_str())
    {
        return false;
    }
    ctor.parameters
        .first()
        .and_then(|p| p.ty)
        .is_some_and(|t| symbols.is_or_inherits(t, "IEnumerable", COLLECTIONS_NAMESPACE))
}

/// The call or member access that uses `id` as its receiver, if any
pub fn downstream(tree: &Tree, symbols: &SymbolTable, id: NodeId) -> Option<NodeId> {
    let mut current = id;
    loop {
        let parent = tree.parent(current)?;
        match tree.kind(parent) {
            NodeKind::Parenthesized | NodeKind::Conversion | NodeKind::DelegateCreation => {
                current = parent;
            }
            NodeKind::Call | NodeKind::MemberAccess | NodeKind::ObjectCreation => {
                let receiver = receiver_of(tree, symbols, parent)?;
                return (receiver == current).then_some(parent);
            }
            _ => return None,
        }
    }
}

/// Calls below `id` in its chain, nearest first (excluding `id`)
pub fn upstream_calls<'a>(
    tree: &'a Tree,
    symbols: &'a SymbolTable,
    id: NodeId,
) -> impl Iterator<Item = NodeId> + 'a {
    walk_upstream(tree, symbols, id)
        .skip(1)
        .filter(move |&n| tree.kind(n) == NodeKind::Call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::World;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_walk_through_extension_chain() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let filtered = w.where_call(users);
        let sorted = w.order_by(filtered, "Name");
        let list = w.queryable_call(sorted, "ToList", vec![]);
        let unit = w.finish_expr(list);

        let walked: Vec<NodeId> = walk_upstream(&unit.tree, &unit.symbols, list).collect();
        assert_eq!(walked, vec![list, sorted, filtered, users, db]);
        assert_eq!(chain_root(&unit.tree, &unit.symbols, list), db);
    }

    #[test]
    fn test_walk_unwraps_conversions() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let converted = w.b.conversion(users, None);
        let paren = w.b.paren(converted);
        let count = w.queryable_call(paren, "Count", vec![]);
        let unit = w.finish_expr(count);

        let walked: Vec<NodeId> = walk_upstream(&unit.tree, &unit.symbols, count).collect();
        assert_eq!(walked, vec![count, users, db]);
    }

    #[test]
    fn test_static_call_is_root() {
        let mut w = World::new();
        let now = w.date_time_now("Now");
        let unit = w.finish_expr(now);
        let walked: Vec<NodeId> = walk_upstream(&unit.tree, &unit.symbols, now).collect();
        assert_eq!(walked, vec![now]);
    }

    #[test]
    fn test_materializing_constructor_is_receiver() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let copy = w.new_list(users);
        let unit = w.finish_expr(copy);

        let walked: Vec<NodeId> = walk_upstream(&unit.tree, &unit.symbols, copy).collect();
        assert_eq!(walked, vec![copy, users, db]);
    }

    #[test]
    fn test_downstream() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let skip = w.queryable_call_n(users, "Skip", 10);
        let sorted = w.order_by(skip, "Name");
        let unit = w.finish_expr(sorted);

        assert_eq!(downstream(&unit.tree, &unit.symbols, skip), Some(sorted));
        assert_eq!(downstream(&unit.tree, &unit.symbols, sorted), None);
    }

    #[test]
    fn test_walk_terminates_within_depth() {
        let mut w = World::new();
        let db = w.context_local("db");
        let mut q = w.db_set(db, "Users");
        for _ in 0..50 {
            q = w.where_call(q);
        }
        let unit = w.finish_expr(q);

        let walked: Vec<NodeId> = walk_upstream(&unit.tree, &unit.symbols, q).collect();
        assert_eq!(walked.len(), 52);
        let mut unique = walked.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), walked.len());
    }
}
