//! Structural rewrite engine
//!
//! A [`Rewrite`] is a titled list of tree [`Edit`]s plus [`SymbolEdit`]s.
//! A batch of rewrites is applied atomically: every edit is checked for
//! overlap against every other first, and a single conflict rejects the
//! whole batch. The result is a fresh, relinked, re-rendered tree.
//!
//! Replacement content is described with [`Template`]s. A template either
//! keeps an original subtree or describes a new node whose children are
//! templates themselves.

pub mod names;
pub mod rename;

pub use names::{fresh_name, NameScope};
pub use rename::Rename;

use crate::diagnostic::FixSafety;
use crate::symbols::{Symbol, SymbolId, SymbolTable, TypeId, TypeInfo, TypeKind};
use crate::tree::{Node, NodeFlags, NodeId, NodeKind, Span, Tree, TreeError, Trivia};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Rewrite engine errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("conflicting edits: {first} overlaps {second}")]
    Conflict { first: String, second: String },

    #[error("edit references node {0} which is not in the tree")]
    UnknownNode(NodeId),

    #[error("edit references unknown symbol {0}")]
    UnknownSymbol(SymbolId),

    #[error("edit references unknown type {0}")]
    UnknownType(TypeId),

    #[error("template binds added symbol #{0} but the rewrite adds fewer members")]
    UnknownAddedSymbol(usize),

    #[error("the root node cannot be removed")]
    RootRemoved,

    #[error("rewritten tree is invalid: {0}")]
    InvalidTree(#[from] TreeError),
}

/// Symbol binding in a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRef {
    Existing(SymbolId),
    /// The n-th member added by the same rewrite's `AddMember` edits
    Added(usize),
}

/// Description of a node created by a rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub kind: NodeKind,
    pub text: Option<String>,
    pub annotation: Option<String>,
    pub modifiers: Vec<String>,
    pub flags: NodeFlags,
    pub symbol: Option<SymbolRef>,
    pub ty: Option<TypeId>,
    /// `None` inherits the replaced node's trivia at the root of a replacement
    pub trivia: Option<Trivia>,
    pub children: Vec<Template>,
}

impl NewNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            text: None,
            annotation: None,
            modifiers: Vec::new(),
            flags: NodeFlags::default(),
            symbol: None,
            ty: None,
            trivia: None,
            children: Vec::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn annotation(mut self, annotation: &str) -> Self {
        self.annotation = Some(annotation.to_string());
        self
    }

    pub fn modifiers(mut self, modifiers: &[&str]) -> Self {
        self.modifiers = modifiers.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn bind(mut self, symbol: SymbolId) -> Self {
        self.symbol = Some(SymbolRef::Existing(symbol));
        self
    }

    pub fn bind_added(mut self, index: usize) -> Self {
        self.symbol = Some(SymbolRef::Added(index));
        self
    }

    pub fn typed(mut self, ty: Option<TypeId>) -> Self {
        self.ty = ty;
        self
    }

    pub fn trivia(mut self, trivia: Trivia) -> Self {
        self.trivia = Some(trivia);
        self
    }

    pub fn leading(mut self, leading: &str) -> Self {
        let mut trivia = self.trivia.unwrap_or_default();
        trivia.leading = leading.to_string();
        self.trivia = Some(trivia);
        self
    }

    pub fn child(mut self, child: Template) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: Vec<Template>) -> Self {
        self.children = children;
        self
    }

    pub fn build(self) -> Template {
        Template::New(Box::new(self))
    }
}

/// Replacement content
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    /// Copy of an original subtree (with any other edits inside it applied)
    Keep(NodeId),
    New(Box<NewNode>),
}

impl From<NewNode> for Template {
    fn from(node: NewNode) -> Self {
        node.build()
    }
}

impl Template {
    pub fn keep(id: NodeId) -> Self {
        Template::Keep(id)
    }

    pub fn ident(name: &str) -> Self {
        NewNode::new(NodeKind::Identifier).text(name).build()
    }

    pub fn type_name(name: &str) -> Self {
        NewNode::new(NodeKind::TypeName).text(name).build()
    }

    pub fn literal(token: &str) -> Self {
        NewNode::new(NodeKind::Literal).text(token).build()
    }

    pub fn member(instance: Template, name: &str) -> Self {
        NewNode::new(NodeKind::MemberAccess)
            .text(name)
            .child(instance)
            .build()
    }

    pub fn call(receiver: Option<Template>, name: &str, args: Vec<Template>) -> Self {
        let mut node = NewNode::new(NodeKind::Call).text(name);
        node.flags.has_receiver = receiver.is_some();
        node.children.extend(receiver);
        node.children.extend(args);
        node.build()
    }

    pub fn unary(op: &str, operand: Template) -> Self {
        NewNode::new(NodeKind::Unary).text(op).child(operand).build()
    }

    pub fn await_expr(inner: Template) -> Self {
        NewNode::new(NodeKind::Await).child(inner).build()
    }

    pub fn expr_stmt(expr: Template) -> Self {
        NewNode::new(NodeKind::ExprStmt).child(expr).build()
    }

    pub fn local(name: &str, init: Template) -> Self {
        NewNode::new(NodeKind::LocalDecl).text(name).child(init).build()
    }

    pub fn using_directive(namespace: &str) -> Self {
        NewNode::new(NodeKind::UsingDirective).text(namespace).build()
    }

    /// `public {ty} {name} { get; set; }`
    pub fn auto_property(ty: &str, name: &str) -> NewNode {
        NewNode::new(NodeKind::Property)
            .text(name)
            .annotation(ty)
            .modifiers(&["public"])
    }

    /// Shallow copy of an original node whose children are kept
    pub fn copy(tree: &Tree, id: NodeId) -> NewNode {
        let node = tree.node(id);
        NewNode {
            kind: node.kind,
            text: node.text.clone(),
            annotation: node.annotation.clone(),
            modifiers: node.modifiers.clone(),
            flags: node.flags,
            symbol: node.symbol.map(SymbolRef::Existing),
            ty: node.ty,
            trivia: None,
            children: node.children.iter().map(|&c| Template::Keep(c)).collect(),
        }
    }

    /// Deep copy of an original subtree where `substitute` may replace any node
    pub fn rebuild(tree: &Tree, id: NodeId, substitute: &dyn Fn(NodeId) -> Option<Template>) -> Template {
        if let Some(replacement) = substitute(id) {
            return replacement;
        }
        let mut copy = Template::copy(tree, id);
        copy.trivia = Some(tree.node(id).trivia.clone());
        copy.children = tree
            .children(id)
            .iter()
            .map(|&c| Template::rebuild(tree, c, substitute))
            .collect();
        copy.build()
    }

    fn visit_kept(&self, f: &mut impl FnMut(NodeId)) {
        match self {
            Template::Keep(id) => f(*id),
            Template::New(node) => node.children.iter().for_each(|c| c.visit_kept(f)),
        }
    }
}

/// One structural edit
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Replace { target: NodeId, with: Template },
    Remove { target: NodeId },
    InsertBefore { anchor: NodeId, node: Template },
    InsertAfter { anchor: NodeId, node: Template },
    /// Insert as the first child of `parent`
    Prepend { parent: NodeId, node: Template },
    /// Insert as the last child of `parent`
    Append { parent: NodeId, node: Template },
}

impl Edit {
    fn anchor(&self) -> NodeId {
        match self {
            Edit::Replace { target, .. } | Edit::Remove { target } => *target,
            Edit::InsertBefore { anchor, .. } | Edit::InsertAfter { anchor, .. } => *anchor,
            Edit::Prepend { parent, .. } | Edit::Append { parent, .. } => *parent,
        }
    }

    fn template(&self) -> Option<&Template> {
        match self {
            Edit::Replace { with, .. } => Some(with),
            Edit::Remove { .. } => None,
            Edit::InsertBefore { node, .. }
            | Edit::InsertAfter { node, .. }
            | Edit::Prepend { node, .. }
            | Edit::Append { node, .. } => Some(node),
        }
    }

    fn is_insertion(&self) -> bool {
        !matches!(self, Edit::Replace { .. } | Edit::Remove { .. })
    }

    /// Source range the edit occupies
    fn region(&self, tree: &Tree) -> Region {
        match self {
            Edit::Replace { target, .. } | Edit::Remove { target } => Region::Span(tree.span(*target)),
            Edit::InsertBefore { anchor, .. } => Region::Point(tree.span(*anchor).start),
            Edit::InsertAfter { anchor, .. } => Region::Point(tree.span(*anchor).end),
            Edit::Prepend { parent, .. } => Region::Point(
                tree.child(*parent, 0)
                    .map(|c| tree.span(c).start)
                    .unwrap_or(tree.span(*parent).start),
            ),
            Edit::Append { parent, .. } => Region::Point(
                tree.children(*parent)
                    .last()
                    .map(|&c| tree.span(c).end)
                    .unwrap_or(tree.span(*parent).end),
            ),
        }
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edit::Replace { target, .. } => write!(f, "replace {}", target),
            Edit::Remove { target } => write!(f, "remove {}", target),
            Edit::InsertBefore { anchor, .. } => write!(f, "insert before {}", anchor),
            Edit::InsertAfter { anchor, .. } => write!(f, "insert after {}", anchor),
            Edit::Prepend { parent, .. } => write!(f, "prepend into {}", parent),
            Edit::Append { parent, .. } => write!(f, "append into {}", parent),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Region {
    Span(Span),
    Point(usize),
}

impl Region {
    fn conflicts(&self, other: &Region) -> bool {
        match (self, other) {
            (Region::Span(a), Region::Span(b)) => a.overlaps(b) || (a == b),
            (Region::Span(s), Region::Point(p)) | (Region::Point(p), Region::Span(s)) => {
                s.strictly_contains_point(*p)
            }
            (Region::Point(_), Region::Point(_)) => false,
        }
    }
}

/// Target of a retype
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTarget {
    Existing(TypeId),
    /// `name<args>`; the generic definition is created when missing
    Generic {
        name: String,
        namespace: String,
        args: Vec<TypeId>,
    },
}

/// Edit to the symbol table
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolEdit {
    Rename { symbol: SymbolId, name: String },
    Retype { symbol: SymbolId, to: TypeTarget },
    AddMember { owner: TypeId, member: Symbol },
}

/// A titled set of edits produced for one diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub title: String,
    pub safety: FixSafety,
    pub edits: Vec<Edit>,
    pub symbol_edits: Vec<SymbolEdit>,
}

impl Rewrite {
    pub fn new(title: &str, safety: FixSafety) -> Self {
        Self {
            title: title.to_string(),
            safety,
            edits: Vec::new(),
            symbol_edits: Vec::new(),
        }
    }

    pub fn edit(mut self, edit: Edit) -> Self {
        self.edits.push(edit);
        self
    }

    pub fn replace(self, target: NodeId, with: Template) -> Self {
        self.edit(Edit::Replace { target, with })
    }

    pub fn remove(self, target: NodeId) -> Self {
        self.edit(Edit::Remove { target })
    }

    pub fn symbol_edit(mut self, edit: SymbolEdit) -> Self {
        self.symbol_edits.push(edit);
        self
    }

    /// Source spans this rewrite touches; used to batch rewrites greedily
    pub fn spans(&self, tree: &Tree) -> Vec<Span> {
        self.edits
            .iter()
            .filter(|e| tree.contains(e.anchor()))
            .map(|e| match e.region(tree) {
                Region::Span(s) => s,
                Region::Point(p) => Span::new(p, p),
            })
            .collect()
    }

    /// Whether any edit of `self` conflicts with any edit of `other`
    pub fn conflicts_with(&self, other: &Rewrite, tree: &Tree) -> bool {
        self.edits.iter().any(|a| {
            other.edits.iter().any(|b| {
                tree.contains(a.anchor())
                    && tree.contains(b.anchor())
                    && !is_duplicate_insertion(a, b)
                    && a.region(tree).conflicts(&b.region(tree))
            })
        })
    }
}

fn is_duplicate_insertion(a: &Edit, b: &Edit) -> bool {
    a.is_insertion() && a == b
}

/// Result of applying a batch
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub tree: Tree,
    pub symbols: SymbolTable,
    /// Replaced node -> root of its replacement in the new tree
    pub replaced: HashMap<NodeId, NodeId>,
}

impl Rewritten {
    /// Rendered text that replaced `target`
    pub fn replacement_text(&self, target: NodeId) -> Option<&str> {
        self.replaced.get(&target).map(|&id| self.tree.source_of(id))
    }
}

/// Apply one rewrite
pub fn apply(tree: &Tree, symbols: &SymbolTable, rewrite: &Rewrite) -> Result<Rewritten, RewriteError> {
    apply_batch(tree, symbols, std::slice::from_ref(rewrite))
}

/// Apply a batch of rewrites atomically
///
/// Identical insertions at the same place (say, two fixes both adding the
/// same `using` directive) are applied once.
pub fn apply_batch(
    tree: &Tree,
    symbols: &SymbolTable,
    rewrites: &[Rewrite],
) -> Result<Rewritten, RewriteError> {
    // Validate ids
    for rewrite in rewrites {
        for edit in &rewrite.edits {
            let id = edit.anchor();
            if !tree.contains(id) {
                return Err(RewriteError::UnknownNode(id));
            }
            let mut missing = None;
            if let Some(template) = edit.template() {
                template.visit_kept(&mut |k| {
                    if !tree.contains(k) {
                        missing.get_or_insert(k);
                    }
                });
            }
            if let Some(k) = missing {
                return Err(RewriteError::UnknownNode(k));
            }
        }
    }

    // Conflicts, and duplicate insertions to skip
    let flat: Vec<(usize, &Edit)> = rewrites
        .iter()
        .enumerate()
        .flat_map(|(ri, r)| r.edits.iter().map(move |e| (ri, e)))
        .collect();
    let regions: Vec<Region> = flat.iter().map(|(_, e)| e.region(tree)).collect();
    let mut skipped = HashSet::new();
    for i in 0..flat.len() {
        for j in (i + 1)..flat.len() {
            if is_duplicate_insertion(flat[i].1, flat[j].1) {
                skipped.insert(j);
                continue;
            }
            if regions[i].conflicts(&regions[j]) {
                return Err(RewriteError::Conflict {
                    first: format!("{} ({})", flat[i].1, rewrites[flat[i].0].title),
                    second: format!("{} ({})", flat[j].1, rewrites[flat[j].0].title),
                });
            }
        }
    }

    let mut symbols = symbols.clone();
    let added = apply_symbol_edits(&mut symbols, rewrites)?;

    let mut plan = Plan::default();
    for (index, (ri, edit)) in flat.iter().enumerate() {
        if skipped.contains(&index) {
            continue;
        }
        let ri = *ri;
        match edit {
            Edit::Replace { target, with } => {
                plan.replace.insert(*target, (with, ri));
            }
            Edit::Remove { target } => {
                plan.removed.insert(*target);
            }
            Edit::InsertBefore { anchor, node } => {
                plan.before.entry(*anchor).or_default().push((node, ri));
            }
            Edit::InsertAfter { anchor, node } => {
                plan.after.entry(*anchor).or_default().push((node, ri));
            }
            Edit::Prepend { parent, node } => {
                plan.prepend.entry(*parent).or_default().push((node, ri));
            }
            Edit::Append { parent, node } => {
                plan.append.entry(*parent).or_default().push((node, ri));
            }
        }
    }

    let mut emitter = Emitter {
        src: tree,
        plan: &plan,
        added: &added,
        out: Vec::new(),
        map: HashMap::new(),
        replaced: HashMap::new(),
        declarations: Vec::new(),
    };
    let root = emitter.emit(tree.root())?.ok_or(RewriteError::RootRemoved)?;
    let Emitter {
        out,
        map,
        replaced,
        declarations,
        ..
    } = emitter;

    remap_declarations(&mut symbols, &map);
    for (symbol, node) in declarations {
        if let Some(s) = symbols.symbol_mut(symbol) {
            s.declaration = Some(node);
        }
    }

    let tree = Tree::from_parts(root, out)?;
    Ok(Rewritten {
        tree,
        symbols,
        replaced,
    })
}

fn apply_symbol_edits(
    symbols: &mut SymbolTable,
    rewrites: &[Rewrite],
) -> Result<Vec<Vec<SymbolId>>, RewriteError> {
    let mut added = Vec::with_capacity(rewrites.len());
    for rewrite in rewrites {
        let mut mine = Vec::new();
        for edit in &rewrite.symbol_edits {
            match edit {
                SymbolEdit::Rename { symbol, name } => {
                    symbols
                        .symbol_mut(*symbol)
                        .ok_or(RewriteError::UnknownSymbol(*symbol))?
                        .name = name.clone();
                }
                SymbolEdit::Retype { symbol, to } => {
                    let ty = resolve_type(symbols, to)?;
                    symbols
                        .symbol_mut(*symbol)
                        .ok_or(RewriteError::UnknownSymbol(*symbol))?
                        .ty = Some(ty);
                }
                SymbolEdit::AddMember { owner, member } => {
                    if symbols.ty(*owner).is_none() {
                        return Err(RewriteError::UnknownType(*owner));
                    }
                    let mut member = member.clone();
                    member.containing_type = Some(*owner);
                    mine.push(symbols.add_symbol(member));
                }
            }
        }
        added.push(mine);
    }
    Ok(added)
}

fn resolve_type(symbols: &mut SymbolTable, target: &TypeTarget) -> Result<TypeId, RewriteError> {
    match target {
        TypeTarget::Existing(ty) => symbols
            .ty(*ty)
            .map(|_| *ty)
            .ok_or(RewriteError::UnknownType(*ty)),
        TypeTarget::Generic {
            name,
            namespace,
            args,
        } => {
            let definition = match symbols.type_by_name(name, namespace) {
                Some(def) => def,
                None => symbols.add_type(TypeInfo::new(name, namespace, TypeKind::Interface)),
            };
            symbols
                .intern_generic(definition, args.clone())
                .ok_or(RewriteError::UnknownType(definition))
        }
    }
}

fn remap_declarations(symbols: &mut SymbolTable, map: &HashMap<NodeId, NodeId>) {
    for symbol in &mut symbols.symbols {
        symbol.declaration = symbol.declaration.and_then(|d| map.get(&d).copied());
    }
    for ty in &mut symbols.types {
        ty.declaration = ty.declaration.and_then(|d| map.get(&d).copied());
    }
}

type Pending<'a> = Vec<(&'a Template, usize)>;

#[derive(Default)]
struct Plan<'a> {
    replace: HashMap<NodeId, (&'a Template, usize)>,
    removed: HashSet<NodeId>,
    before: HashMap<NodeId, Pending<'a>>,
    after: HashMap<NodeId, Pending<'a>>,
    prepend: HashMap<NodeId, Pending<'a>>,
    append: HashMap<NodeId, Pending<'a>>,
}

struct Emitter<'a> {
    src: &'a Tree,
    plan: &'a Plan<'a>,
    added: &'a [Vec<SymbolId>],
    out: Vec<Node>,
    /// Original id -> first emitted copy
    map: HashMap<NodeId, NodeId>,
    replaced: HashMap<NodeId, NodeId>,
    declarations: Vec<(SymbolId, NodeId)>,
}

impl Emitter<'_> {
    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.out.len() as u32);
        self.out.push(node);
        id
    }

    /// Emit an original node at its original position
    fn emit(&mut self, old: NodeId) -> Result<Option<NodeId>, RewriteError> {
        if self.plan.removed.contains(&old) {
            return Ok(None);
        }
        if let Some(&(template, ri)) = self.plan.replace.get(&old) {
            let id = self.emit_template(template, ri, Some(old))?;
            self.replaced.insert(old, id);
            return Ok(Some(id));
        }
        self.copy(old).map(Some)
    }

    /// Copy an original node, applying edits below it
    fn copy(&mut self, old: NodeId) -> Result<NodeId, RewriteError> {
        let plan = self.plan;
        let mut children = Vec::new();
        for &(template, ri) in plan.prepend.get(&old).into_iter().flatten() {
            children.push(self.emit_template(template, ri, None)?);
        }
        for &child in self.src.children(old) {
            for &(template, ri) in plan.before.get(&child).into_iter().flatten() {
                children.push(self.emit_template(template, ri, None)?);
            }
            if let Some(id) = self.emit(child)? {
                children.push(id);
            }
            for &(template, ri) in plan.after.get(&child).into_iter().flatten() {
                children.push(self.emit_template(template, ri, None)?);
            }
        }
        for &(template, ri) in plan.append.get(&old).into_iter().flatten() {
            children.push(self.emit_template(template, ri, None)?);
        }

        let mut node = self.src.node(old).clone();
        node.children = children;
        let id = self.push(node);
        self.map.entry(old).or_insert(id);
        Ok(id)
    }

    fn emit_template(
        &mut self,
        template: &Template,
        ri: usize,
        replaced: Option<NodeId>,
    ) -> Result<NodeId, RewriteError> {
        match template {
            Template::Keep(kept) => {
                let id = self.copy(*kept)?;
                if let Some(target) = replaced {
                    let outer = &self.src.node(target).trivia;
                    let trivia = &mut self.out[id.index()].trivia;
                    if !outer.leading.is_empty() {
                        trivia.leading = outer.leading.clone();
                    }
                    if !outer.trailing.is_empty() {
                        trivia.trailing = outer.trailing.clone();
                    }
                }
                Ok(id)
            }
            Template::New(new) => {
                let mut children = Vec::with_capacity(new.children.len());
                for child in &new.children {
                    children.push(self.emit_template(child, ri, None)?);
                }
                let symbol = match new.symbol {
                    None => None,
                    Some(SymbolRef::Existing(s)) => Some(s),
                    Some(SymbolRef::Added(n)) => Some(
                        self.added
                            .get(ri)
                            .and_then(|a| a.get(n))
                            .copied()
                            .ok_or(RewriteError::UnknownAddedSymbol(n))?,
                    ),
                };
                let trivia = match (&new.trivia, replaced) {
                    (Some(t), _) => t.clone(),
                    (None, Some(target)) => self.src.node(target).trivia.clone(),
                    (None, None) => Trivia::default(),
                };

                let mut node = Node::new(new.kind);
                node.text = new.text.clone();
                node.annotation = new.annotation.clone();
                node.modifiers = new.modifiers.clone();
                node.flags = new.flags;
                node.symbol = symbol;
                node.ty = new.ty;
                node.trivia = trivia;
                node.children = children;
                let id = self.push(node);

                if let (Some(SymbolRef::Added(_)), Some(s)) = (new.symbol, symbol) {
                    if new.kind.is_member() || matches!(new.kind, NodeKind::Parameter | NodeKind::LocalDecl) {
                        self.declarations.push((s, id));
                    }
                }
                Ok(id)
            }
        }
    }
}
