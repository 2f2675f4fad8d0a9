//! Two-phase symbol rename
//!
//! Phase one collects every node bound to the symbol (its declaration
//! included) against the unmodified tree. Phase two turns that set into
//! edits, so a rename composes with other edits in the same rewrite.

use super::{Edit, NewNode, Rewrite, SymbolEdit, Template};
use crate::diagnostic::FixSafety;
use crate::symbols::{SymbolId, SymbolTable};
use crate::tree::{NodeId, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub symbol: SymbolId,
    pub new_name: String,
    /// Declaration and references, in tree order
    pub references: Vec<NodeId>,
}

impl Rename {
    pub fn collect(tree: &Tree, symbols: &SymbolTable, symbol: SymbolId, new_name: &str) -> Self {
        let declaration = symbols
            .symbol(symbol)
            .and_then(|s| s.declaration)
            .filter(|&d| tree.contains(d));
        let references = tree
            .walk()
            .filter(|&n| tree.node(n).symbol == Some(symbol) || Some(n) == declaration)
            .collect();
        Self {
            symbol,
            new_name: new_name.to_string(),
            references,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// One edit per reference, renaming the node and keeping its children
    pub fn edits(&self, tree: &Tree) -> Vec<Edit> {
        self.references
            .iter()
            .map(|&target| Edit::Replace {
                target,
                with: self.renamed(tree, target),
            })
            .collect()
    }

    /// Copy of `target` carrying the new name
    pub fn renamed(&self, tree: &Tree, target: NodeId) -> Template {
        let mut copy: NewNode = Template::copy(tree, target);
        copy.text = Some(self.new_name.clone());
        copy.build()
    }

    pub fn symbol_edit(&self) -> SymbolEdit {
        SymbolEdit::Rename {
            symbol: self.symbol,
            name: self.new_name.clone(),
        }
    }

    pub fn into_rewrite(self, tree: &Tree, title: &str, safety: FixSafety) -> Rewrite {
        let mut rewrite = Rewrite::new(title, safety);
        rewrite.edits = self.edits(tree);
        rewrite.symbol_edits.push(self.symbol_edit());
        rewrite
    }
}
