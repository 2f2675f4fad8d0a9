//! Canonical source rendering
//!
//! Renders a tree in the analyzed language's surface syntax. Structural
//! whitespace is produced here (one statement per line, four spaces per
//! block depth); trivia is copied verbatim around each node, with line
//! breaks in leading trivia re-indented to the node's depth.

use super::{NodeId, NodeKind, Span, Tree};

const INDENT: &str = "    ";

/// Render `tree`, returning the source and each node's (span, name span)
pub fn render(tree: &Tree) -> (String, Vec<(Span, Option<Span>)>) {
    let mut renderer = Renderer {
        tree,
        out: String::new(),
        spans: vec![(Span::default(), None); tree.len()],
        depth: 0,
    };
    renderer.node(tree.root());
    (renderer.out, renderer.spans)
}

struct Renderer<'a> {
    tree: &'a Tree,
    out: String,
    spans: Vec<(Span, Option<Span>)>,
    depth: usize,
}

impl Renderer<'_> {
    fn node(&mut self, id: NodeId) {
        let tree = self.tree;
        let node = tree.node(id);
        self.leading(&node.trivia.leading);
        let start = self.out.len();
        self.shape(id);
        self.spans[id.index()].0 = Span::new(start, self.out.len());
        self.out.push_str(&node.trivia.trailing);
    }

    fn leading(&mut self, text: &str) {
        let mut lines = text.split('\n');
        if let Some(first) = lines.next() {
            self.out.push_str(first);
        }
        for line in lines {
            self.out.push('\n');
            self.indent();
            self.out.push_str(line.trim_start_matches([' ', '\t']));
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    fn name(&mut self, id: NodeId) {
        let start = self.out.len();
        self.out.push_str(self.tree.text(id));
        self.spans[id.index()].1 = Some(Span::new(start, self.out.len()));
    }

    fn modifiers(&mut self, id: NodeId) {
        for modifier in &self.tree.node(id).modifiers {
            self.out.push_str(modifier);
            self.out.push(' ');
        }
    }

    fn list(&mut self, items: &[NodeId]) {
        for (i, &item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.node(item);
        }
    }

    fn braced(&mut self, items: &[NodeId]) {
        if items.is_empty() {
            self.out.push_str("{\n");
            self.indent();
            self.out.push('}');
            return;
        }
        self.out.push_str("{\n");
        self.depth += 1;
        for &item in items {
            self.indent();
            self.node(item);
            self.out.push('\n');
        }
        self.depth -= 1;
        self.indent();
        self.out.push('}');
    }

    /// Body of an `if`, loop, or `using` statement
    fn embedded(&mut self, body: Option<NodeId>) {
        match body {
            Some(body) => {
                self.out.push(' ');
                self.node(body);
            }
            None => self.out.push(';'),
        }
    }

    fn opt(&mut self, id: Option<NodeId>) {
        if let Some(id) = id {
            self.node(id);
        }
    }

    fn shape(&mut self, id: NodeId) {
        let tree = self.tree;
        let node = tree.node(id);
        let children = node.children.as_slice();
        let first = children.first().copied();

        match node.kind {
            NodeKind::CompilationUnit => {
                for (i, &child) in children.iter().enumerate() {
                    if i > 0 {
                        self.out.push('\n');
                        let previous = tree.kind(children[i - 1]);
                        if (previous == NodeKind::UsingDirective
                            && tree.kind(child) != NodeKind::UsingDirective)
                            || previous == NodeKind::TypeDecl
                        {
                            self.out.push('\n');
                        }
                    }
                    self.node(child);
                }
            }
            NodeKind::UsingDirective => {
                self.out.push_str("using ");
                self.name(id);
                self.out.push(';');
            }
            NodeKind::TypeDecl => {
                self.modifiers(id);
                self.out.push_str("class ");
                self.name(id);
                if let Some(bases) = &node.annotation {
                    self.out.push_str(" : ");
                    self.out.push_str(bases);
                }
                self.out.push(' ');
                self.braced(children);
            }
            NodeKind::Method | NodeKind::LocalFunction => {
                self.modifiers(id);
                if node.flags.is_async {
                    self.out.push_str("async ");
                }
                if let Some(ret) = &node.annotation {
                    self.out.push_str(ret);
                    self.out.push(' ');
                }
                self.name(id);
                self.out.push('(');
                let params: Vec<NodeId> = tree.params(id).collect();
                self.list(&params);
                self.out.push(')');
                match tree.body(id) {
                    Some(body) if tree.kind(body) == NodeKind::Block => {
                        self.out.push(' ');
                        self.node(body);
                    }
                    Some(body) => {
                        self.out.push_str(" => ");
                        self.node(body);
                        self.out.push(';');
                    }
                    None => self.out.push(';'),
                }
            }
            NodeKind::Property => {
                self.modifiers(id);
                self.out.push_str(node.annotation.as_deref().unwrap_or("object"));
                self.out.push(' ');
                self.name(id);
                self.out.push_str(" { get; set; }");
                if let Some(init) = first {
                    self.out.push_str(" = ");
                    self.node(init);
                    self.out.push(';');
                }
            }
            NodeKind::Field => {
                self.modifiers(id);
                self.out.push_str(node.annotation.as_deref().unwrap_or("object"));
                self.out.push(' ');
                self.name(id);
                if let Some(init) = first {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                self.out.push(';');
            }
            NodeKind::Parameter => {
                self.modifiers(id);
                if let Some(ty) = &node.annotation {
                    self.out.push_str(ty);
                    self.out.push(' ');
                }
                self.name(id);
                if let Some(default) = first {
                    self.out.push_str(" = ");
                    self.node(default);
                }
            }
            NodeKind::Block => self.braced(children),
            NodeKind::ExprStmt => {
                self.opt(first);
                self.out.push(';');
            }
            NodeKind::LocalDecl => {
                if node.flags.is_using {
                    self.out.push_str("using ");
                }
                self.out.push_str(node.annotation.as_deref().unwrap_or("var"));
                self.out.push(' ');
                self.name(id);
                if let Some(init) = first {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                let in_header = node
                    .parent
                    .map(|p| matches!(tree.kind(p), NodeKind::UsingStmt | NodeKind::For))
                    .unwrap_or(false);
                if !in_header {
                    self.out.push(';');
                }
            }
            NodeKind::UsingStmt => {
                self.out.push_str("using (");
                self.opt(first);
                self.out.push(')');
                self.embedded(children.get(1).copied());
            }
            NodeKind::Return => {
                self.out.push_str("return");
                if let Some(value) = first {
                    self.out.push(' ');
                    self.node(value);
                }
                self.out.push(';');
            }
            NodeKind::If => {
                self.out.push_str("if (");
                self.opt(first);
                self.out.push(')');
                self.embedded(children.get(1).copied());
                if let Some(otherwise) = children.get(2).copied() {
                    self.out.push_str(" else ");
                    self.node(otherwise);
                }
            }
            NodeKind::For => {
                self.out.push_str("for (");
                let (body, header) = match children.split_last() {
                    Some((body, header)) => (Some(*body), header),
                    None => (None, children),
                };
                for (i, &part) in header.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str("; ");
                    }
                    self.node(part);
                }
                self.out.push(')');
                self.embedded(body);
            }
            NodeKind::ForEach => {
                if node.flags.is_await {
                    self.out.push_str("await ");
                }
                self.out.push_str("foreach (");
                self.out.push_str(node.annotation.as_deref().unwrap_or("var"));
                self.out.push(' ');
                self.name(id);
                self.out.push_str(" in ");
                self.opt(first);
                self.out.push(')');
                self.embedded(children.get(1).copied());
            }
            NodeKind::While => {
                self.out.push_str("while (");
                self.opt(first);
                self.out.push(')');
                self.embedded(children.get(1).copied());
            }
            NodeKind::DoWhile => {
                self.out.push_str("do");
                self.embedded(first);
                self.out.push_str(" while (");
                self.opt(children.get(1).copied());
                self.out.push_str(");");
            }
            NodeKind::Call => {
                if let Some(receiver) = tree.receiver(id) {
                    self.node(receiver);
                    self.out.push('.');
                }
                self.name(id);
                if let Some(generics) = &node.annotation {
                    self.out.push('<');
                    self.out.push_str(generics);
                    self.out.push('>');
                }
                self.out.push('(');
                self.list(tree.args(id));
                self.out.push(')');
            }
            NodeKind::MemberAccess => {
                if let Some(instance) = first {
                    self.node(instance);
                    self.out.push('.');
                }
                self.name(id);
            }
            NodeKind::Identifier
            | NodeKind::TypeName
            | NodeKind::Literal
            | NodeKind::InterpolatedString => self.name(id),
            NodeKind::Binary => {
                self.opt(first);
                self.out.push(' ');
                self.out.push_str(node.text());
                self.out.push(' ');
                self.opt(children.get(1).copied());
            }
            NodeKind::Unary => {
                self.out.push_str(node.text());
                self.opt(first);
            }
            NodeKind::Conditional => {
                self.opt(first);
                self.out.push_str(" ? ");
                self.opt(children.get(1).copied());
                self.out.push_str(" : ");
                self.opt(children.get(2).copied());
            }
            NodeKind::Lambda => {
                if node.flags.is_async {
                    self.out.push_str("async ");
                }
                let params: Vec<NodeId> = tree.params(id).collect();
                match params.as_slice() {
                    [single] if tree.node(*single).annotation.is_none() => self.node(*single),
                    _ => {
                        self.out.push('(');
                        self.list(&params);
                        self.out.push(')');
                    }
                }
                self.out.push_str(" => ");
                self.opt(tree.body(id));
            }
            NodeKind::Await => {
                self.out.push_str("await ");
                self.opt(first);
            }
            NodeKind::Conversion => {
                if let Some(target) = &node.annotation {
                    self.out.push('(');
                    self.out.push_str(target);
                    self.out.push(')');
                }
                self.opt(first);
            }
            NodeKind::DelegateCreation => self.opt(first),
            NodeKind::Parenthesized => {
                self.out.push('(');
                self.opt(first);
                self.out.push(')');
            }
            NodeKind::ObjectCreation => {
                self.out.push_str("new ");
                self.out.push_str(node.annotation.as_deref().unwrap_or(""));
                self.out.push('(');
                self.list(children);
                self.out.push(')');
            }
            NodeKind::Assignment => {
                self.opt(first);
                self.out.push(' ');
                self.out.push_str(node.text.as_deref().unwrap_or("="));
                self.out.push(' ');
                self.opt(children.get(1).copied());
            }
        }
    }
}
