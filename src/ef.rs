//! Data-access vocabulary: well-known types, operator sets, and identity lookup
//!
//! Every predicate here answers `false`/`None` for unresolved input, so
//! rules built on them abstain rather than fail.

use crate::symbols::{Symbol, SymbolId, SymbolKind, SymbolTable, TypeId};
use crate::tree::{NodeId, NodeKind, Tree};

pub const LINQ: &str = "System.Linq";
pub const COLLECTIONS: &str = "System.Collections.Generic";
pub const IMMUTABLE: &str = "System.Collections.Immutable";
pub const EF_CORE: &str = "Microsoft.EntityFrameworkCore";
pub const EF_CHANGE_TRACKING: &str = "Microsoft.EntityFrameworkCore.ChangeTracking";
pub const SYSTEM: &str = "System";
pub const THREADING: &str = "System.Threading";

/// Calls that copy a sequence into an in-memory collection
pub const COLLECTION_MATERIALIZERS: &[&str] = &[
    "ToList",
    "ToListAsync",
    "ToArray",
    "ToArrayAsync",
    "ToDictionary",
    "ToDictionaryAsync",
    "ToHashSet",
    "ToHashSetAsync",
    "ToLookup",
];

/// Calls that execute a query (materialize, fetch a single row, or aggregate)
pub const EXECUTION_METHODS: &[&str] = &[
    "ToList",
    "ToArray",
    "ToDictionary",
    "ToHashSet",
    "ToLookup",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "ElementAt",
    "ElementAtOrDefault",
    "Count",
    "LongCount",
    "Any",
    "All",
    "Sum",
    "Average",
    "Min",
    "Max",
    "Contains",
    "Aggregate",
    "ExecuteDelete",
    "ExecuteUpdate",
    "Load",
];

pub const SORT_METHODS: &[&str] = &["OrderBy", "OrderByDescending"];
pub const REFINE_SORT_METHODS: &[&str] = &["ThenBy", "ThenByDescending"];

/// Calls that limit how many rows a query returns
pub const BOUNDING_METHODS: &[&str] = &[
    "Take",
    "TakeWhile",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "FirstAsync",
    "FirstOrDefaultAsync",
    "SingleAsync",
    "SingleOrDefaultAsync",
    "LastAsync",
    "LastOrDefaultAsync",
    "Find",
    "FindAsync",
];

/// Calls that reduce a query to a scalar on the server
pub const AGGREGATE_METHODS: &[&str] = &[
    "Count",
    "LongCount",
    "Any",
    "All",
    "Sum",
    "Average",
    "Min",
    "Max",
    "CountAsync",
    "LongCountAsync",
    "AnyAsync",
    "AllAsync",
    "SumAsync",
    "AverageAsync",
    "MinAsync",
    "MaxAsync",
    "ExecuteDelete",
    "ExecuteUpdate",
    "ExecuteDeleteAsync",
    "ExecuteUpdateAsync",
];

/// Synchronous methods with an awaitable counterpart (`name` + `Async`)
const SYNC_WITH_ASYNC: &[&str] = &[
    "ToList",
    "ToArray",
    "ToDictionary",
    "ToHashSet",
    "First",
    "FirstOrDefault",
    "Single",
    "SingleOrDefault",
    "Last",
    "LastOrDefault",
    "Count",
    "LongCount",
    "Any",
    "All",
    "Min",
    "Max",
    "Sum",
    "Average",
    "SaveChanges",
    "Find",
    "ExecuteUpdate",
    "ExecuteDelete",
];

pub fn async_counterpart(name: &str) -> Option<String> {
    SYNC_WITH_ASYNC
        .contains(&name)
        .then(|| format!("{}Async", name))
}

pub fn is_one_of(name: &str, set: &[&str]) -> bool {
    set.contains(&name)
}

// Type predicates

fn is_named(symbols: &SymbolTable, ty: TypeId, name: &str, namespace: &str) -> bool {
    symbols.ty(ty).is_some_and(|t| t.is(name, namespace))
}

pub fn is_queryable(symbols: &SymbolTable, ty: TypeId) -> bool {
    symbols.is_or_inherits(ty, "IQueryable", LINQ)
        || symbols.is_or_inherits(ty, "IOrderedQueryable", LINQ)
}

pub fn is_ordered_queryable(symbols: &SymbolTable, ty: TypeId) -> bool {
    symbols.is_or_inherits(ty, "IOrderedQueryable", LINQ)
}

pub fn is_enumerable(symbols: &SymbolTable, ty: TypeId) -> bool {
    symbols.is_or_inherits(ty, "IEnumerable", COLLECTIONS)
}

pub fn is_db_set(symbols: &SymbolTable, ty: TypeId) -> bool {
    symbols
        .base_chain(ty)
        .into_iter()
        .any(|t| is_named(symbols, t, "DbSet", EF_CORE))
}

pub fn is_db_context(symbols: &SymbolTable, ty: TypeId) -> bool {
    symbols
        .base_chain(ty)
        .into_iter()
        .any(|t| is_named(symbols, t, "DbContext", EF_CORE))
}

pub fn is_string(symbols: &SymbolTable, ty: TypeId) -> bool {
    is_named(symbols, ty, "String", SYSTEM)
}

pub fn is_cancellation_token(symbols: &SymbolTable, ty: TypeId) -> bool {
    is_named(symbols, ty, "CancellationToken", THREADING)
}

pub fn is_grouping(symbols: &SymbolTable, ty: TypeId) -> bool {
    symbols.is_or_inherits(ty, "IGrouping", LINQ)
}

/// Type of a sequence's elements: the first type argument of its
/// `IQueryable<T>`/`IEnumerable<T>` supertype
pub fn element_type(symbols: &SymbolTable, ty: TypeId) -> Option<TypeId> {
    ["IQueryable", "IOrderedQueryable"]
        .iter()
        .find_map(|name| symbols.find_supertype(ty, name, LINQ))
        .or_else(|| symbols.find_supertype(ty, "IEnumerable", COLLECTIONS))
        .and_then(|t| symbols.first_type_arg(t))
        .or_else(|| symbols.first_type_arg(ty))
}

// Symbol predicates

pub fn containing_namespace<'a>(symbols: &'a SymbolTable, symbol: &Symbol) -> Option<&'a str> {
    symbol
        .containing_type
        .and_then(|t| symbols.ty(t))
        .map(|t| t.namespace.as_str())
}

pub fn containing_type_is(symbols: &SymbolTable, symbol: &Symbol, name: &str, namespace: &str) -> bool {
    symbol
        .containing_type
        .is_some_and(|t| is_named(symbols, t, name, namespace))
}

/// Method from `System.Linq.Queryable` or `System.Linq.Enumerable`
pub fn is_linq_operator(symbols: &SymbolTable, method: &Symbol) -> bool {
    containing_type_is(symbols, method, "Queryable", LINQ)
        || containing_type_is(symbols, method, "Enumerable", LINQ)
}

pub fn is_enumerable_operator(symbols: &SymbolTable, method: &Symbol) -> bool {
    containing_type_is(symbols, method, "Enumerable", LINQ)
}

/// Method declared anywhere under the EF Core namespace
pub fn is_ef_method(symbols: &SymbolTable, method: &Symbol) -> bool {
    containing_namespace(symbols, method).is_some_and(|ns| ns.starts_with(EF_CORE))
}

/// Linq or EF query operator: the query provider's own operator set
pub fn is_query_operator(symbols: &SymbolTable, method: &Symbol) -> bool {
    is_linq_operator(symbols, method) || is_ef_method(symbols, method)
}

// Entity model

/// DbSet properties of a context type, with their entity types
pub fn mapped_sets(symbols: &SymbolTable, context: TypeId) -> Vec<(SymbolId, TypeId)> {
    symbols
        .members(context)
        .into_iter()
        .filter_map(|member| {
            let symbol = symbols.symbol(member)?;
            if symbol.kind != SymbolKind::Property {
                return None;
            }
            let ty = symbol.ty?;
            if !is_db_set(symbols, ty) {
                return None;
            }
            Some((member, symbols.first_type_arg(ty)?))
        })
        .collect()
}

/// User-declared context types (those with a declaration in the unit)
pub fn declared_contexts(symbols: &SymbolTable) -> Vec<TypeId> {
    symbols
        .type_ids()
        .filter(|&t| {
            symbols.ty(t).is_some_and(|info| info.declaration.is_some()) && is_db_context(symbols, t)
        })
        .collect()
}

/// Every entity type mapped by a declared context, deduplicated in order
pub fn mapped_entities(symbols: &SymbolTable) -> Vec<TypeId> {
    let mut entities = Vec::new();
    for context in declared_contexts(symbols) {
        for (_, entity) in mapped_sets(symbols, context) {
            if !entities.contains(&entity) {
                entities.push(entity);
            }
        }
    }
    entities
}

/// Identity property of an entity by attribute or naming convention
///
/// `[Key]` wins over `Id`, which wins over `{Type}Id`. Base types are
/// searched too. Type-level `[PrimaryKey("Name")]` names the member.
pub fn primary_key(symbols: &SymbolTable, entity: TypeId) -> Option<SymbolId> {
    let info = symbols.ty(entity)?;
    let properties: Vec<SymbolId> = symbols
        .members(entity)
        .into_iter()
        .filter(|&m| symbols.symbol(m).is_some_and(|s| s.kind == SymbolKind::Property))
        .collect();
    let named = |name: &str| {
        properties.iter().copied().find(|&m| {
            symbols
                .symbol(m)
                .is_some_and(|s| s.name.eq_ignore_ascii_case(name))
        })
    };

    if let Some(attr) = info.attributes.iter().find(|a| a.is("PrimaryKey")) {
        if let Some(member) = attr.args.first().and_then(|arg| named(arg.trim_matches('"'))) {
            return Some(member);
        }
    }
    properties
        .iter()
        .copied()
        .find(|&m| symbols.symbol(m).is_some_and(|s| s.has_attribute("Key")))
        .or_else(|| named("Id"))
        .or_else(|| named(&format!("{}Id", info.name)))
}

/// Whether an entity declares identity or opts out of having one
pub fn has_identity(symbols: &SymbolTable, entity: TypeId) -> bool {
    let Some(info) = symbols.ty(entity) else {
        return true;
    };
    info.has_attribute("Keyless")
        || info.has_attribute("PrimaryKey")
        || primary_key(symbols, entity).is_some()
}

/// Heuristic: textual scan of a context's `OnModelCreating` body for
/// `Entity<T>` together with `HasKey`.
///
/// Best effort. Comment text can satisfy it and a key configured through
/// a helper method is missed; absence of the pattern means "not found".
pub fn has_fluent_key(tree: &Tree, symbols: &SymbolTable, context: TypeId, entity: TypeId) -> bool {
    let Some(entity_name) = symbols.ty(entity).map(|t| t.name.as_str()) else {
        return false;
    };
    let Some(method) = symbols.find_member(context, "OnModelCreating") else {
        return false;
    };
    let Some(declaration) = symbols
        .symbol(method)
        .and_then(|s| s.declaration)
        .filter(|&d| tree.contains(d))
    else {
        return false;
    };
    let text = tree.source_of(declaration);
    text.contains(&format!("Entity<{}>", entity_name)) && text.contains("HasKey")
}

/// Static type of an expression node
pub fn type_of(tree: &Tree, id: NodeId) -> Option<TypeId> {
    tree.node(id).ty
}

/// Bound method of a call node
pub fn method_of<'a>(tree: &Tree, symbols: &'a SymbolTable, call: NodeId) -> Option<&'a Symbol> {
    if tree.kind(call) != NodeKind::Call {
        return None;
    }
    tree.node(call)
        .symbol
        .and_then(|s| symbols.symbol(s))
        .filter(|s| s.is_method())
}
