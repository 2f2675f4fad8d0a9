//! Bottom-up tree construction for front ends and tests

use super::{Node, NodeId, NodeKind, Tree, TreeError};
use crate::symbols::{SymbolId, TypeId};

/// Builds a node arena child-first, then validates it into a [`Tree`]
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn make(&mut self, kind: NodeKind, text: Option<&str>, children: Vec<NodeId>) -> NodeId {
        let mut node = Node::new(kind);
        node.text = text.map(str::to_string);
        node.children = children;
        self.push(node)
    }

    /// Validate and render the tree rooted at `root`
    pub fn finish(self, root: NodeId) -> Result<Tree, TreeError> {
        Tree::from_parts(root, self.nodes)
    }

    // Decorations

    pub fn bind(&mut self, id: NodeId, symbol: SymbolId) -> NodeId {
        self.node_mut(id).symbol = Some(symbol);
        id
    }

    pub fn typed(&mut self, id: NodeId, ty: TypeId) -> NodeId {
        self.node_mut(id).ty = Some(ty);
        id
    }

    pub fn annotate(&mut self, id: NodeId, annotation: &str) -> NodeId {
        self.node_mut(id).annotation = Some(annotation.to_string());
        id
    }

    pub fn modifiers(&mut self, id: NodeId, modifiers: &[&str]) -> NodeId {
        self.node_mut(id).modifiers = modifiers.iter().map(|m| m.to_string()).collect();
        id
    }

    pub fn set_async(&mut self, id: NodeId) -> NodeId {
        self.node_mut(id).flags.is_async = true;
        id
    }

    pub fn leading(&mut self, id: NodeId, trivia: &str) -> NodeId {
        self.node_mut(id).trivia.leading = trivia.to_string();
        id
    }

    pub fn trailing(&mut self, id: NodeId, trivia: &str) -> NodeId {
        self.node_mut(id).trivia.trailing = trivia.to_string();
        id
    }

    // Expressions

    pub fn ident(&mut self, name: &str) -> NodeId {
        self.make(NodeKind::Identifier, Some(name), Vec::new())
    }

    pub fn type_name(&mut self, name: &str) -> NodeId {
        self.make(NodeKind::TypeName, Some(name), Vec::new())
    }

    pub fn literal(&mut self, token: &str) -> NodeId {
        self.make(NodeKind::Literal, Some(token), Vec::new())
    }

    pub fn interpolated(&mut self, token: &str) -> NodeId {
        self.make(NodeKind::InterpolatedString, Some(token), Vec::new())
    }

    pub fn member(&mut self, instance: NodeId, name: &str) -> NodeId {
        self.make(NodeKind::MemberAccess, Some(name), vec![instance])
    }

    /// Call written as `receiver.name(args)`, or `name(args)` without receiver
    pub fn call(&mut self, receiver: Option<NodeId>, name: &str, args: Vec<NodeId>) -> NodeId {
        let mut children = Vec::with_capacity(args.len() + 1);
        children.extend(receiver);
        children.extend(args);
        let id = self.make(NodeKind::Call, Some(name), children);
        self.node_mut(id).flags.has_receiver = receiver.is_some();
        id
    }

    pub fn param(&mut self, name: &str) -> NodeId {
        self.make(NodeKind::Parameter, Some(name), Vec::new())
    }

    pub fn typed_param(&mut self, ty: &str, name: &str) -> NodeId {
        let id = self.param(name);
        self.annotate(id, ty)
    }

    pub fn lambda(&mut self, params: Vec<NodeId>, body: NodeId) -> NodeId {
        let mut children = params;
        children.push(body);
        self.make(NodeKind::Lambda, None, children)
    }

    pub fn binary(&mut self, op: &str, left: NodeId, right: NodeId) -> NodeId {
        self.make(NodeKind::Binary, Some(op), vec![left, right])
    }

    pub fn unary(&mut self, op: &str, operand: NodeId) -> NodeId {
        self.make(NodeKind::Unary, Some(op), vec![operand])
    }

    pub fn conditional(&mut self, cond: NodeId, then: NodeId, otherwise: NodeId) -> NodeId {
        self.make(NodeKind::Conditional, None, vec![cond, then, otherwise])
    }

    pub fn paren(&mut self, inner: NodeId) -> NodeId {
        self.make(NodeKind::Parenthesized, None, vec![inner])
    }

    pub fn await_expr(&mut self, inner: NodeId) -> NodeId {
        self.make(NodeKind::Await, None, vec![inner])
    }

    /// Conversion; implicit when `target` is `None`
    pub fn conversion(&mut self, inner: NodeId, target: Option<&str>) -> NodeId {
        let id = self.make(NodeKind::Conversion, None, vec![inner]);
        self.node_mut(id).annotation = target.map(str::to_string);
        id
    }

    pub fn delegate(&mut self, inner: NodeId) -> NodeId {
        self.make(NodeKind::DelegateCreation, None, vec![inner])
    }

    pub fn object_creation(&mut self, ty: &str, args: Vec<NodeId>) -> NodeId {
        let id = self.make(NodeKind::ObjectCreation, None, args);
        self.annotate(id, ty)
    }

    pub fn assign(&mut self, target: NodeId, value: NodeId) -> NodeId {
        self.make(NodeKind::Assignment, Some("="), vec![target, value])
    }

    // Statements

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.make(NodeKind::Block, None, statements)
    }

    pub fn expr_stmt(&mut self, expr: NodeId) -> NodeId {
        self.make(NodeKind::ExprStmt, None, vec![expr])
    }

    pub fn local(&mut self, name: &str, init: Option<NodeId>) -> NodeId {
        self.make(NodeKind::LocalDecl, Some(name), init.into_iter().collect())
    }

    /// Mark a local declaration as `using var`
    pub fn using_decl(&mut self, decl: NodeId) -> NodeId {
        self.node_mut(decl).flags.is_using = true;
        decl
    }

    pub fn using_stmt(&mut self, resource: NodeId, body: NodeId) -> NodeId {
        self.make(NodeKind::UsingStmt, None, vec![resource, body])
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.make(NodeKind::Return, None, value.into_iter().collect())
    }

    pub fn if_stmt(&mut self, cond: NodeId, then: NodeId, otherwise: Option<NodeId>) -> NodeId {
        let mut children = vec![cond, then];
        children.extend(otherwise);
        self.make(NodeKind::If, None, children)
    }

    pub fn foreach(&mut self, var: &str, collection: NodeId, body: NodeId) -> NodeId {
        self.make(NodeKind::ForEach, Some(var), vec![collection, body])
    }

    pub fn await_foreach(&mut self, var: &str, collection: NodeId, body: NodeId) -> NodeId {
        let id = self.foreach(var, collection, body);
        self.node_mut(id).flags.is_await = true;
        id
    }

    pub fn while_loop(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        self.make(NodeKind::While, None, vec![cond, body])
    }

    pub fn do_while(&mut self, body: NodeId, cond: NodeId) -> NodeId {
        self.make(NodeKind::DoWhile, None, vec![body, cond])
    }

    /// `for (init; cond; step) body`
    pub fn for_loop(&mut self, init: NodeId, cond: NodeId, step: NodeId, body: NodeId) -> NodeId {
        self.make(NodeKind::For, None, vec![init, cond, step, body])
    }

    // Declarations

    pub fn method(&mut self, ret: &str, name: &str, params: Vec<NodeId>, body: NodeId) -> NodeId {
        let mut children = params;
        children.push(body);
        let id = self.make(NodeKind::Method, Some(name), children);
        if !ret.is_empty() {
            self.annotate(id, ret);
        }
        id
    }

    pub fn local_function(
        &mut self,
        ret: &str,
        name: &str,
        params: Vec<NodeId>,
        body: NodeId,
    ) -> NodeId {
        let id = self.method(ret, name, params, body);
        self.node_mut(id).kind = NodeKind::LocalFunction;
        id
    }

    pub fn property(&mut self, ty: &str, name: &str) -> NodeId {
        let id = self.make(NodeKind::Property, Some(name), Vec::new());
        self.annotate(id, ty)
    }

    pub fn field(&mut self, ty: &str, name: &str) -> NodeId {
        let id = self.make(NodeKind::Field, Some(name), Vec::new());
        self.annotate(id, ty)
    }

    pub fn class(&mut self, name: &str, bases: Option<&str>, members: Vec<NodeId>) -> NodeId {
        let id = self.make(NodeKind::TypeDecl, Some(name), members);
        self.node_mut(id).annotation = bases.map(str::to_string);
        id
    }

    pub fn using_directive(&mut self, namespace: &str) -> NodeId {
        self.make(NodeKind::UsingDirective, Some(namespace), Vec::new())
    }

    pub fn unit(&mut self, items: Vec<NodeId>) -> NodeId {
        self.make(NodeKind::CompilationUnit, None, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_receiver_and_args() {
        let mut b = TreeBuilder::new();
        let q = b.ident("q");
        let n = b.literal("10");
        let skip = b.call(Some(q), "Skip", vec![n]);
        let tree = b.finish(skip).unwrap();

        assert_eq!(tree.receiver(skip), Some(q));
        assert_eq!(tree.args(skip), &[n]);
        assert_eq!(tree.source(), "q.Skip(10)");
    }

    #[test]
    fn test_call_without_receiver() {
        let mut b = TreeBuilder::new();
        let x = b.ident("x");
        let call = b.call(None, "Helper", vec![x]);
        let tree = b.finish(call).unwrap();

        assert_eq!(tree.receiver(call), None);
        assert_eq!(tree.args(call), &[x]);
    }

    #[test]
    fn test_for_loop_header() {
        let mut b = TreeBuilder::new();
        let zero = b.literal("0");
        let init = b.local("i", Some(zero));
        let i = b.ident("i");
        let n = b.ident("n");
        let cond = b.binary("<", i, n);
        let i2 = b.ident("i");
        let step = b.unary("++", i2);
        let body = b.block(vec![]);
        let f = b.for_loop(init, cond, step, body);
        let tree = b.finish(f).unwrap();
        assert_eq!(tree.source(), "for (var i = 0; i < n; ++i) {\n}");
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let mut b = TreeBuilder::new();
        let _orphan = b.ident("orphan");
        let root = b.ident("root");
        assert!(b.finish(root).is_err());
    }
}
