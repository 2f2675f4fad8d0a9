//! Lexical loop containment

use crate::tree::{NodeId, Tree};

/// Nearest loop enclosing `node`
///
/// Walks parent links and stops at the nearest function boundary, so a
/// loop around a lambda does not contain the lambda's body.
pub fn enclosing_loop(tree: &Tree, node: NodeId) -> Option<NodeId> {
    for ancestor in tree.ancestors(node) {
        let kind = tree.kind(ancestor);
        if kind.is_function() {
            return None;
        }
        if kind.is_loop() {
            return Some(ancestor);
        }
    }
    None
}

pub fn is_in_loop(tree: &Tree, node: NodeId) -> bool {
    enclosing_loop(tree, node).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, TreeBuilder};

    #[test]
    fn test_foreach_body_is_inside() {
        let mut b = TreeBuilder::new();
        let items = b.ident("items");
        let call = b.call(None, "Load", vec![]);
        let stmt = b.expr_stmt(call);
        let body = b.block(vec![stmt]);
        let each = b.foreach("x", items, body);
        let tree = b.finish(each).unwrap();

        assert_eq!(enclosing_loop(&tree, call), Some(each));
        assert_eq!(enclosing_loop(&tree, items), Some(each));
    }

    #[test]
    fn test_crosses_if_and_blocks() {
        let mut b = TreeBuilder::new();
        let cond = b.ident("more");
        let call = b.call(None, "Save", vec![]);
        let stmt = b.expr_stmt(call);
        let then = b.block(vec![stmt]);
        let flag = b.ident("dirty");
        let branch = b.if_stmt(flag, then, None);
        let body = b.block(vec![branch]);
        let w = b.while_loop(cond, body);
        let tree = b.finish(w).unwrap();

        assert_eq!(enclosing_loop(&tree, call), Some(w));
        assert_eq!(enclosing_loop(&tree, cond), Some(w));
    }

    #[test]
    fn test_stops_at_lambda_boundary() {
        let mut b = TreeBuilder::new();
        let call = b.call(None, "Save", vec![]);
        let lambda = b.lambda(vec![], call);
        let register = b.call(None, "Register", vec![lambda]);
        let stmt = b.expr_stmt(register);
        let body = b.block(vec![stmt]);
        let cond = b.literal("true");
        let d = b.do_while(body, cond);
        let tree = b.finish(d).unwrap();

        assert_eq!(enclosing_loop(&tree, call), None);
        assert_eq!(enclosing_loop(&tree, register), Some(d));
    }

    #[test]
    fn test_for_parts_are_inside() {
        let mut b = TreeBuilder::new();
        let first = b.call(None, "Start", vec![]);
        let init = b.local("i", Some(first));
        let i = b.ident("i");
        let n = b.call(None, "Limit", vec![]);
        let cond = b.binary("<", i, n);
        let i2 = b.ident("i");
        let step = b.unary("++", i2);
        let body = b.block(vec![]);
        let f = b.for_loop(init, cond, step, body);
        let tree = b.finish(f).unwrap();

        assert_eq!(enclosing_loop(&tree, first), Some(f));
        assert_eq!(enclosing_loop(&tree, n), Some(f));
        assert_eq!(enclosing_loop(&tree, step), Some(f));
    }

    #[test]
    fn test_nested_loop_nearest_wins() {
        let mut b = TreeBuilder::new();
        let call = b.call(None, "Query", vec![]);
        let stmt = b.expr_stmt(call);
        let inner_body = b.block(vec![stmt]);
        let ys = b.ident("ys");
        let inner = b.await_foreach("y", ys, inner_body);
        let outer_body = b.block(vec![inner]);
        let xs = b.ident("xs");
        let outer = b.foreach("x", xs, outer_body);
        let tree = b.finish(outer).unwrap();

        assert_eq!(enclosing_loop(&tree, call), Some(inner));
        assert_eq!(enclosing_loop(&tree, ys), Some(inner));
        assert_eq!(enclosing_loop(&tree, xs), Some(outer));
    }

    fn assert_matches_path_scan(tree: &Tree) {
        for id in tree.ids() {
            let expected = tree
                .ancestors(id)
                .take_while(|&a| !tree.kind(a).is_function())
                .any(|a| tree.kind(a).is_loop());
            assert_eq!(is_in_loop(tree, id), expected, "node {}", id);
        }
    }

    #[test]
    fn test_containment_matches_path_scan() {
        let mut b = TreeBuilder::new();
        let call = b.call(None, "Query", vec![]);
        let stmt = b.expr_stmt(call);
        let lambda_body = b.block(vec![stmt]);
        let lambda = b.lambda(vec![], lambda_body);
        let run = b.call(None, "Run", vec![lambda]);
        let run_stmt = b.expr_stmt(run);
        let body = b.block(vec![run_stmt]);
        let cond = b.ident("c");
        let w = b.while_loop(cond, body);
        let tree = b.finish(w).unwrap();

        assert_matches_path_scan(&tree);
    }

    #[test]
    fn test_containment_matches_path_scan_foreach_and_for() {
        let mut b = TreeBuilder::new();
        let source = b.call(None, "Items", vec![]);
        let start = b.call(None, "Start", vec![]);
        let init = b.local("i", Some(start));
        let i = b.ident("i");
        let n = b.ident("n");
        let cond = b.binary("<", i, n);
        let i2 = b.ident("i");
        let step = b.unary("++", i2);
        let query = b.call(None, "Query", vec![]);
        let stmt = b.expr_stmt(query);
        let for_body = b.block(vec![stmt]);
        let f = b.for_loop(init, cond, step, for_body);
        let saved = b.call(None, "Save", vec![]);
        let lambda = b.lambda(vec![], saved);
        let register = b.call(None, "Register", vec![lambda]);
        let register_stmt = b.expr_stmt(register);
        let each_body = b.block(vec![f, register_stmt]);
        let each = b.foreach("x", source, each_body);
        let tree = b.finish(each).unwrap();

        assert_eq!(tree.kind(each), NodeKind::ForEach);
        assert_eq!(enclosing_loop(&tree, source), Some(each));
        assert_eq!(enclosing_loop(&tree, start), Some(f));
        assert_eq!(enclosing_loop(&tree, saved), None);
        assert_matches_path_scan(&tree);
    }
}
