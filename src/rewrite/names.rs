//! Collision-free local names

use crate::tree::{NodeId, Tree};
use std::collections::HashSet;

/// First of `base`, `base1`, `base2`, ... not in `taken`
pub fn fresh_name(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Names visible in a scope, plus names handed out so far
#[derive(Debug, Clone, Default)]
pub struct NameScope {
    taken: HashSet<String>,
}

impl NameScope {
    /// Every declared or referenced name below `scope`
    pub fn for_scope(tree: &Tree, scope: NodeId) -> Self {
        let taken = tree
            .declared_names(scope)
            .into_iter()
            .chain(tree.identifier_names(scope))
            .collect();
        Self { taken }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    /// Fresh name derived from `base`, reserved so later calls skip it
    pub fn fresh(&mut self, base: &str) -> String {
        let name = fresh_name(base, &self.taken);
        self.reserve(&name);
        name
    }
}
