//! Resolved symbols and types supplied by the front end

use crate::tree::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Method,
    Constructor,
    Property,
    Field,
    Parameter,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accessibility {
    #[default]
    Public,
    Internal,
    Protected,
    Private,
}

/// A named annotation with optional positional constructor arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Attribute {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Matches `Key` against both `Key` and `KeyAttribute`
    pub fn is(&self, name: &str) -> bool {
        self.name == name
            || self
                .name
                .strip_suffix("Attribute")
                .is_some_and(|short| short == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(default)]
    pub ty: Option<TypeId>,
    #[serde(default)]
    pub is_extension_receiver: bool,
    #[serde(default)]
    pub is_optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub ty: Option<TypeId>,
    #[serde(default)]
    pub containing_type: Option<TypeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub accessibility: Accessibility,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_extension: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterInfo>,
    #[serde(default)]
    pub declaration: Option<NodeId>,
}

impl Symbol {
    pub fn new(name: &str, kind: SymbolKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            ty: None,
            containing_type: None,
            attributes: Vec::new(),
            accessibility: Accessibility::Public,
            is_static: false,
            is_const: false,
            is_async: false,
            is_extension: false,
            parameters: Vec::new(),
            declaration: None,
        }
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.is(name))
    }

    pub fn is_method(&self) -> bool {
        matches!(self.kind, SymbolKind::Method | SymbolKind::Constructor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    #[default]
    Class,
    Struct,
    Interface,
    Enum,
    Delegate,
    TypeParameter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_args: Vec<TypeId>,
    #[serde(default)]
    pub base: Option<TypeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<TypeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<SymbolId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub declaration: Option<NodeId>,
}

impl TypeInfo {
    pub fn new(name: &str, namespace: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind,
            type_args: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            attributes: Vec::new(),
            declaration: None,
        }
    }

    pub fn is(&self, name: &str, namespace: &str) -> bool {
        self.name == name && self.namespace == namespace
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.is(name))
    }
}

/// Symbol and type arena for one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub types: Vec<TypeInfo>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        if let Some(owner) = symbol.containing_type {
            if let Some(ty) = self.types.get_mut(owner.0 as usize) {
                ty.members.push(id);
            }
        }
        self.symbols.push(symbol);
        id
    }

    pub fn add_type(&mut self, ty: TypeInfo) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    /// Generic instantiation `definition<args>`, reusing an existing entry
    pub fn intern_generic(&mut self, definition: TypeId, args: Vec<TypeId>) -> Option<TypeId> {
        let def = self.ty(definition)?.clone();
        let existing = self
            .types
            .iter()
            .position(|t| t.name == def.name && t.namespace == def.namespace && t.type_args == args);
        if let Some(index) = existing {
            return Some(TypeId(index as u32));
        }
        let mut instance = def;
        instance.type_args = args;
        instance.members = Vec::new();
        instance.declaration = None;
        Some(self.add_type(instance))
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> Option<&mut Symbol> {
        self.symbols.get_mut(id.0 as usize)
    }

    pub fn ty(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(id.0 as usize)
    }

    pub fn ty_mut(&mut self, id: TypeId) -> Option<&mut TypeInfo> {
        self.types.get_mut(id.0 as usize)
    }

    pub fn type_args(&self, id: TypeId) -> &[TypeId] {
        self.ty(id).map(|t| t.type_args.as_slice()).unwrap_or(&[])
    }

    pub fn first_type_arg(&self, id: TypeId) -> Option<TypeId> {
        self.type_args(id).first().copied()
    }

    /// `id` followed by its base types, nearest first, cycle-guarded
    pub fn base_chain(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id);
        while let Some(ty) = current {
            if !seen.insert(ty) {
                break;
            }
            chain.push(ty);
            current = self.ty(ty).and_then(|t| t.base);
        }
        chain
    }

    /// Every interface implemented by `id` or its bases, transitively
    pub fn all_interfaces(&self, id: TypeId) -> Vec<TypeId> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<TypeId> = self
            .base_chain(id)
            .iter()
            .filter_map(|&t| self.ty(t))
            .flat_map(|t| t.interfaces.iter().copied())
            .collect();
        while let Some(iface) = stack.pop() {
            if !seen.insert(iface) {
                continue;
            }
            found.push(iface);
            if let Some(info) = self.ty(iface) {
                stack.extend(info.interfaces.iter().copied());
            }
        }
        found
    }

    /// True when `id` is, derives from, or implements `name` in `namespace`
    pub fn is_or_inherits(&self, id: TypeId, name: &str, namespace: &str) -> bool {
        self.base_chain(id)
            .into_iter()
            .chain(self.all_interfaces(id))
            .filter_map(|t| self.ty(t))
            .any(|t| t.is(name, namespace))
    }

    /// The supertype (self, base, or interface) named `name`, if any
    pub fn find_supertype(&self, id: TypeId, name: &str, namespace: &str) -> Option<TypeId> {
        self.base_chain(id)
            .into_iter()
            .chain(self.all_interfaces(id))
            .find(|&t| self.ty(t).is_some_and(|info| info.is(name, namespace)))
    }

    /// Members declared on `id` and its bases, nearest first
    pub fn members(&self, id: TypeId) -> Vec<SymbolId> {
        self.base_chain(id)
            .into_iter()
            .filter_map(|t| self.ty(t))
            .flat_map(|t| t.members.iter().copied())
            .collect()
    }

    pub fn find_member(&self, id: TypeId, name: &str) -> Option<SymbolId> {
        self.members(id)
            .into_iter()
            .find(|&m| self.symbol(m).is_some_and(|s| s.name == name))
    }

    pub fn type_by_name(&self, name: &str, namespace: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.is(name, namespace) && t.type_args.is_empty())
            .map(|i| TypeId(i as u32))
    }

    /// Source-style type name, e.g. `IQueryable<User>`
    pub fn display(&self, id: TypeId) -> String {
        match self.ty(id) {
            Some(info) if info.type_args.is_empty() => info.name.clone(),
            Some(info) => {
                let args: Vec<String> = info.type_args.iter().map(|&a| self.display(a)).collect();
                format!("{}<{}>", info.name, args.join(", "))
            }
            None => "?".to_string(),
        }
    }

    pub fn symbol_ids(&self) -> impl Iterator<Item = SymbolId> + '_ {
        (0..self.symbols.len()).map(|i| SymbolId(i as u32))
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).map(|i| TypeId(i as u32))
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_chain_cycle_guarded() {
        let mut table = SymbolTable::new();
        let a = table.add_type(TypeInfo::new("A", "N", TypeKind::Class));
        let b = table.add_type(TypeInfo::new("B", "N", TypeKind::Class));
        table.ty_mut(a).unwrap().base = Some(b);
        table.ty_mut(b).unwrap().base = Some(a);

        assert_eq!(table.base_chain(a), vec![a, b]);
        assert!(table.is_or_inherits(a, "B", "N"));
        assert!(!table.is_or_inherits(a, "C", "N"));
    }

    #[test]
    fn test_interfaces_transitive() {
        let mut table = SymbolTable::new();
        let enumerable = table.add_type(TypeInfo::new("IEnumerable", "G", TypeKind::Interface));
        let mut queryable = TypeInfo::new("IQueryable", "L", TypeKind::Interface);
        queryable.interfaces.push(enumerable);
        let queryable = table.add_type(queryable);
        let mut set = TypeInfo::new("DbSet", "E", TypeKind::Class);
        set.interfaces.push(queryable);
        let set = table.add_type(set);

        assert!(table.is_or_inherits(set, "IEnumerable", "G"));
        assert_eq!(table.find_supertype(set, "IQueryable", "L"), Some(queryable));
    }

    #[test]
    fn test_intern_generic_reuses() {
        let mut table = SymbolTable::new();
        let list = table.add_type(TypeInfo::new("List", "G", TypeKind::Class));
        let user = table.add_type(TypeInfo::new("User", "App", TypeKind::Class));
        let first = table.intern_generic(list, vec![user]).unwrap();
        let second = table.intern_generic(list, vec![user]).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.display(first), "List<User>");
    }

    #[test]
    fn test_members_and_attributes() {
        let mut table = SymbolTable::new();
        let user = table.add_type(TypeInfo::new("User", "App", TypeKind::Class));
        let mut id = Symbol::new("UserId", SymbolKind::Property);
        id.containing_type = Some(user);
        id.attributes.push(Attribute::new("KeyAttribute"));
        let id = table.add_symbol(id);

        assert_eq!(table.find_member(user, "UserId"), Some(id));
        assert!(table.symbol(id).unwrap().has_attribute("Key"));
    }
}
