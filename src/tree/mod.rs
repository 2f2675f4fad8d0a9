//! Arena-backed syntax tree
//!
//! Nodes are stored in a flat vector and addressed by [`NodeId`]. Parent
//! links are weak indices rebuilt on load, so the tree owns every node and
//! navigation never creates reference cycles.
//!
//! Source text is not stored on the wire: a tree's source is its canonical
//! rendering (see [`render`]), which also assigns every node its [`Span`].

pub mod builder;
pub mod render;

pub use builder::TreeBuilder;

use crate::symbols::{SymbolId, TypeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Index of a node in its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Half-open byte range in rendered source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True when `offset` lies strictly between the ends of this span
    pub fn strictly_contains_point(&self, offset: usize) -> bool {
        self.start < offset && offset < self.end
    }
}

/// Syntactic category of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    CompilationUnit,
    UsingDirective,
    TypeDecl,
    Method,
    LocalFunction,
    Property,
    Field,
    Parameter,
    Block,
    ExprStmt,
    LocalDecl,
    UsingStmt,
    Return,
    If,
    For,
    ForEach,
    While,
    DoWhile,
    Call,
    MemberAccess,
    Identifier,
    TypeName,
    Literal,
    InterpolatedString,
    Binary,
    Unary,
    Conditional,
    Lambda,
    Await,
    Conversion,
    DelegateCreation,
    Parenthesized,
    ObjectCreation,
    Assignment,
}

impl NodeKind {
    pub const ALL: &'static [NodeKind] = &[
        NodeKind::CompilationUnit,
        NodeKind::UsingDirective,
        NodeKind::TypeDecl,
        NodeKind::Method,
        NodeKind::LocalFunction,
        NodeKind::Property,
        NodeKind::Field,
        NodeKind::Parameter,
        NodeKind::Block,
        NodeKind::ExprStmt,
        NodeKind::LocalDecl,
        NodeKind::UsingStmt,
        NodeKind::Return,
        NodeKind::If,
        NodeKind::For,
        NodeKind::ForEach,
        NodeKind::While,
        NodeKind::DoWhile,
        NodeKind::Call,
        NodeKind::MemberAccess,
        NodeKind::Identifier,
        NodeKind::TypeName,
        NodeKind::Literal,
        NodeKind::InterpolatedString,
        NodeKind::Binary,
        NodeKind::Unary,
        NodeKind::Conditional,
        NodeKind::Lambda,
        NodeKind::Await,
        NodeKind::Conversion,
        NodeKind::DelegateCreation,
        NodeKind::Parenthesized,
        NodeKind::ObjectCreation,
        NodeKind::Assignment,
    ];

    /// Iteration constructs, including async iteration
    pub fn is_loop(self) -> bool {
        matches!(
            self,
            NodeKind::For | NodeKind::ForEach | NodeKind::While | NodeKind::DoWhile
        )
    }

    /// Function boundaries: bodies that run in their own invocation
    pub fn is_function(self) -> bool {
        matches!(
            self,
            NodeKind::Method | NodeKind::LocalFunction | NodeKind::Lambda
        )
    }

    pub fn is_statement(self) -> bool {
        matches!(
            self,
            NodeKind::Block
                | NodeKind::ExprStmt
                | NodeKind::LocalDecl
                | NodeKind::UsingStmt
                | NodeKind::Return
                | NodeKind::If
                | NodeKind::For
                | NodeKind::ForEach
                | NodeKind::While
                | NodeKind::DoWhile
                | NodeKind::LocalFunction
        )
    }

    pub fn is_member(self) -> bool {
        matches!(
            self,
            NodeKind::TypeDecl | NodeKind::Method | NodeKind::Property | NodeKind::Field
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown node kind: {}", s))
    }
}

/// Boolean node properties
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFlags {
    /// Function or lambda declared `async`
    #[serde(skip_serializing_if = "is_false")]
    pub is_async: bool,
    /// Local declared with scoped (auto-disposing) lifetime
    #[serde(skip_serializing_if = "is_false")]
    pub is_using: bool,
    /// Asynchronous iteration (`await foreach`)
    #[serde(skip_serializing_if = "is_false")]
    pub is_await: bool,
    /// Call whose first child is its syntactic receiver
    #[serde(skip_serializing_if = "is_false")]
    pub has_receiver: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Formatting text attached around a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trivia {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub leading: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trailing: String,
}

impl Trivia {
    pub fn is_empty(&self) -> bool {
        self.leading.is_empty() && self.trailing.is_empty()
    }
}

/// A single syntax node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<SymbolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeId>,
    #[serde(default, skip_serializing_if = "Trivia::is_empty")]
    pub trivia: Trivia,

    #[serde(skip)]
    pub parent: Option<NodeId>,
    #[serde(skip)]
    pub span: Span,
    #[serde(skip)]
    pub name_span: Option<Span>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            text: None,
            annotation: None,
            modifiers: Vec::new(),
            flags: NodeFlags::default(),
            children: Vec::new(),
            symbol: None,
            ty: None,
            trivia: Trivia::default(),
            parent: None,
            span: Span::default(),
            name_span: None,
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|m| m == modifier)
    }
}

/// Structural problems found while loading a tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("tree has no nodes")]
    Empty,

    #[error("root {0} is out of range")]
    RootOutOfRange(NodeId),

    #[error("node {parent} references child {child} which does not exist")]
    ChildOutOfRange { parent: NodeId, child: NodeId },

    #[error("node {child} has two parents ({first} and {second})")]
    MultipleParents {
        child: NodeId,
        first: NodeId,
        second: NodeId,
    },

    #[error("root {0} appears as a child")]
    RootIsChild(NodeId),

    #[error("node {0} is not reachable from the root")]
    Unreachable(NodeId),
}

#[derive(Deserialize)]
struct RawTree {
    root: NodeId,
    nodes: Vec<Node>,
}

impl TryFrom<RawTree> for Tree {
    type Error = TreeError;

    fn try_from(raw: RawTree) -> Result<Self, Self::Error> {
        Tree::from_parts(raw.root, raw.nodes)
    }
}

/// The analyzed unit's syntax tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawTree")]
pub struct Tree {
    root: NodeId,
    nodes: Vec<Node>,
    #[serde(skip)]
    source: String,
    #[serde(skip)]
    line_starts: Vec<usize>,
}

impl Tree {
    /// Validate, link parents, and render a node arena
    pub fn from_parts(root: NodeId, mut nodes: Vec<Node>) -> Result<Self, TreeError> {
        if nodes.is_empty() {
            return Err(TreeError::Empty);
        }
        if root.index() >= nodes.len() {
            return Err(TreeError::RootOutOfRange(root));
        }

        let mut parents: Vec<Option<NodeId>> = vec![None; nodes.len()];
        for (index, node) in nodes.iter().enumerate() {
            let parent = NodeId(index as u32);
            for &child in &node.children {
                if child.index() >= nodes.len() {
                    return Err(TreeError::ChildOutOfRange { parent, child });
                }
                if child == root {
                    return Err(TreeError::RootIsChild(root));
                }
                if let Some(first) = parents[child.index()] {
                    return Err(TreeError::MultipleParents {
                        child,
                        first,
                        second: parent,
                    });
                }
                parents[child.index()] = Some(parent);
            }
        }

        // Every node has at most one parent and the root has none, so a
        // walk from the root visits each reachable node exactly once.
        let mut reached = vec![false; nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            reached[id.index()] = true;
            stack.extend(nodes[id.index()].children.iter().copied());
        }
        if let Some(index) = reached.iter().position(|r| !r) {
            return Err(TreeError::Unreachable(NodeId(index as u32)));
        }

        for (node, parent) in nodes.iter_mut().zip(parents) {
            node.parent = parent;
        }

        let mut tree = Self {
            root,
            nodes,
            source: String::new(),
            line_starts: Vec::new(),
        };
        tree.render();
        Ok(tree)
    }

    /// Re-render the source and recompute every span
    pub fn render(&mut self) {
        let (source, spans) = render::render(self);
        for (node, (span, name_span)) in self.nodes.iter_mut().zip(spans) {
            node.span = span;
            node.name_span = name_span;
        }
        self.line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        self.source = source;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Node by id. Ids handed out by this tree are always valid.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| NodeId(i as u32))
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub fn text(&self, id: NodeId) -> &str {
        self.node(id).text()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.children(id).get(index).copied()
    }

    /// Position of `id` among its parent's children
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Strict ancestors, nearest first
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent(id),
        }
    }

    /// `id` and all nodes below it, in pre-order
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            tree: self,
            stack: vec![id],
        }
    }

    /// Pre-order walk of the whole tree
    pub fn walk(&self) -> Descendants<'_> {
        self.descendants(self.root)
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.node(id).span
    }

    /// Span of the node's name token, falling back to its full span
    pub fn name_span(&self, id: NodeId) -> Span {
        let node = self.node(id);
        node.name_span.unwrap_or(node.span)
    }

    /// Rendered text of a node
    pub fn source_of(&self, id: NodeId) -> &str {
        let span = self.span(id);
        self.source.get(span.start..span.end).unwrap_or("")
    }

    /// Convert a byte offset to 1-based (line, column)
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts.get(line.saturating_sub(1)).copied().unwrap_or(0);
        (line.max(1), offset.saturating_sub(line_start) + 1)
    }

    /// 1-based line of a node's start
    pub fn line_of(&self, id: NodeId) -> usize {
        self.line_col(self.span(id).start).0
    }

    // Shape accessors. These never fail: a node outside the expected
    // shape answers `None` or an empty slice.

    /// Syntactic receiver of a call, or instance expression of a member access
    pub fn receiver(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id);
        match node.kind {
            NodeKind::Call if node.flags.has_receiver => node.children.first().copied(),
            NodeKind::MemberAccess => node.children.first().copied(),
            _ => None,
        }
    }

    /// Written arguments of a call or object creation
    pub fn args(&self, id: NodeId) -> &[NodeId] {
        let node = self.node(id);
        match node.kind {
            NodeKind::Call if node.flags.has_receiver => {
                node.children.get(1..).unwrap_or(&[])
            }
            NodeKind::Call | NodeKind::ObjectCreation => &node.children,
            _ => &[],
        }
    }

    pub fn arg(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.args(id).get(index).copied()
    }

    /// Declared parameters of a method, local function, or lambda
    pub fn params(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&c| self.kind(c) == NodeKind::Parameter)
    }

    /// Body of a method, local function, or lambda
    pub fn body(&self, id: NodeId) -> Option<NodeId> {
        if !self.kind(id).is_function() {
            return None;
        }
        self.children(id)
            .iter()
            .copied()
            .rfind(|&c| self.kind(c) != NodeKind::Parameter)
    }

    /// The only parameter of a single-parameter lambda
    pub fn lambda_param(&self, id: NodeId) -> Option<NodeId> {
        let mut params = self.params(id);
        let first = params.next()?;
        params.next().is_none().then_some(first)
    }

    /// Expression a lambda evaluates to: its expression body, or the
    /// returned value of a block body holding a single `return`
    pub fn lambda_result(&self, id: NodeId) -> Option<NodeId> {
        let body = self.body(id)?;
        if self.kind(body) != NodeKind::Block {
            return Some(body);
        }
        match self.children(body) {
            [only] if self.kind(*only) == NodeKind::Return => self.child(*only, 0),
            _ => None,
        }
    }

    /// Strip parentheses, conversions, and delegate wrappers
    pub fn unwrap_transparent(&self, mut id: NodeId) -> NodeId {
        while matches!(
            self.kind(id),
            NodeKind::Parenthesized | NodeKind::Conversion | NodeKind::DelegateCreation
        ) {
            match self.child(id, 0) {
                Some(inner) => id = inner,
                None => break,
            }
        }
        id
    }

    /// Nearest ancestor of one of the given kinds
    pub fn nearest(&self, id: NodeId, kinds: &[NodeKind]) -> Option<NodeId> {
        self.ancestors(id).find(|&a| kinds.contains(&self.kind(a)))
    }

    /// Nearest enclosing method, local function, or lambda
    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).find(|&a| self.kind(a).is_function())
    }

    /// Nearest enclosing method or local function, skipping lambdas
    pub fn enclosing_method(&self, id: NodeId) -> Option<NodeId> {
        self.nearest(id, &[NodeKind::Method, NodeKind::LocalFunction])
    }

    pub fn enclosing_type(&self, id: NodeId) -> Option<NodeId> {
        self.nearest(id, &[NodeKind::TypeDecl])
    }

    /// Nearest statement containing `id` (itself included)
    pub fn enclosing_statement(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&n| self.kind(n).is_statement() && self.kind(n) != NodeKind::Block)
    }

    /// Names declared by locals, parameters, and loop variables below `scope`
    pub fn declared_names(&self, scope: NodeId) -> Vec<String> {
        self.descendants(scope)
            .filter(|&n| {
                matches!(
                    self.kind(n),
                    NodeKind::LocalDecl
                        | NodeKind::Parameter
                        | NodeKind::ForEach
                        | NodeKind::LocalFunction
                )
            })
            .filter_map(|n| self.node(n).text.clone())
            .collect()
    }

    /// Names referenced by identifiers below `scope`
    pub fn identifier_names(&self, scope: NodeId) -> Vec<String> {
        self.descendants(scope)
            .filter(|&n| self.kind(n) == NodeKind::Identifier)
            .map(|n| self.text(n).to_string())
            .collect()
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }
}

/// Iterator over strict ancestors
pub struct Ancestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

/// Pre-order iterator over a subtree
pub struct Descendants<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(current).iter().rev().copied());
        Some(current)
    }
}
