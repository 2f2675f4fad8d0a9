//! Test fixture: a small data-access world
//!
//! Builds trees together with the symbol table a front end would resolve
//! for them: an `AppDb` context, entity types with mapped sets, and the
//! Linq and EF Core operator symbols the rules recognise.

use crate::document::Unit;
use crate::ef::{self, COLLECTIONS, EF_CHANGE_TRACKING, EF_CORE, LINQ, SYSTEM, THREADING};
use crate::symbols::{
    Attribute, ParameterInfo, Symbol, SymbolId, SymbolKind, SymbolTable, TypeId, TypeInfo, TypeKind,
};
use crate::tree::{NodeId, NodeKind, TreeBuilder};
use std::collections::HashMap;
use std::path::PathBuf;

pub const APP: &str = "App";

/// Well-known types every world starts with
#[derive(Debug, Clone, Copy)]
pub struct Types {
    pub object: TypeId,
    pub string: TypeId,
    pub int: TypeId,
    pub bool: TypeId,
    pub date_time: TypeId,
    pub cancellation_token: TypeId,
    pub enumerable_def: TypeId,
    pub list_def: TypeId,
    pub queryable_def: TypeId,
    pub ordered_queryable_def: TypeId,
    pub grouping_def: TypeId,
    pub linq_queryable: TypeId,
    pub linq_enumerable: TypeId,
    pub db_context: TypeId,
    pub db_set_def: TypeId,
    pub ef_extensions: TypeId,
    pub relational_extensions: TypeId,
    pub entity_entry: TypeId,
    pub reference_entry: TypeId,
    pub collection_entry: TypeId,
    pub app_db: TypeId,
    pub service: TypeId,
}

const EF_OPERATORS: &[&str] = &[
    "AsNoTracking",
    "AsTracking",
    "Include",
    "ThenInclude",
    "IgnoreQueryFilters",
    "ExecuteDelete",
    "ExecuteUpdate",
];

const RELATIONAL_OPERATORS: &[&str] = &[
    "FromSqlRaw",
    "FromSqlInterpolated",
    "FromSql",
    "ExecuteSqlRaw",
    "ExecuteSqlInterpolated",
];

pub struct World {
    pub b: TreeBuilder,
    pub symbols: SymbolTable,
    pub types: Types,
    methods: HashMap<(TypeId, String, usize), SymbolId>,
    locals: HashMap<String, SymbolId>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        let mut s = SymbolTable::new();
        let mut add = |name: &str, ns: &str, kind: TypeKind| s.add_type(TypeInfo::new(name, ns, kind));

        let object = add("Object", SYSTEM, TypeKind::Class);
        let string = add("String", SYSTEM, TypeKind::Class);
        let int = add("Int32", SYSTEM, TypeKind::Struct);
        let bool = add("Boolean", SYSTEM, TypeKind::Struct);
        let date_time = add("DateTime", SYSTEM, TypeKind::Struct);
        let cancellation_token = add("CancellationToken", THREADING, TypeKind::Struct);
        let enumerable_def = add("IEnumerable", COLLECTIONS, TypeKind::Interface);
        let list_def = add("List", COLLECTIONS, TypeKind::Class);
        let queryable_def = add("IQueryable", LINQ, TypeKind::Interface);
        let ordered_queryable_def = add("IOrderedQueryable", LINQ, TypeKind::Interface);
        let grouping_def = add("IGrouping", LINQ, TypeKind::Interface);
        let linq_queryable = add("Queryable", LINQ, TypeKind::Class);
        let linq_enumerable = add("Enumerable", LINQ, TypeKind::Class);
        let db_context = add("DbContext", EF_CORE, TypeKind::Class);
        let db_set_def = add("DbSet", EF_CORE, TypeKind::Class);
        let ef_extensions = add("EntityFrameworkQueryableExtensions", EF_CORE, TypeKind::Class);
        let relational_extensions = add("RelationalQueryableExtensions", EF_CORE, TypeKind::Class);
        let entity_entry = add("EntityEntry", EF_CHANGE_TRACKING, TypeKind::Class);
        let reference_entry = add("ReferenceEntry", EF_CHANGE_TRACKING, TypeKind::Class);
        let collection_entry = add("CollectionEntry", EF_CHANGE_TRACKING, TypeKind::Class);
        let app_db = add("AppDb", APP, TypeKind::Class);
        let service = add("Service", APP, TypeKind::Class);

        for ty in [string, list_def, db_context, db_set_def, app_db, service] {
            if let Some(info) = s.ty_mut(ty) {
                info.base = Some(object);
            }
        }
        if let Some(info) = s.ty_mut(app_db) {
            info.base = Some(db_context);
        }

        Self {
            b: TreeBuilder::new(),
            symbols: s,
            types: Types {
                object,
                string,
                int,
                bool,
                date_time,
                cancellation_token,
                enumerable_def,
                list_def,
                queryable_def,
                ordered_queryable_def,
                grouping_def,
                linq_queryable,
                linq_enumerable,
                db_context,
                db_set_def,
                ef_extensions,
                relational_extensions,
                entity_entry,
                reference_entry,
                collection_entry,
                app_db,
                service,
            },
            methods: HashMap::new(),
            locals: HashMap::new(),
        }
    }

    // Types

    fn generic(&mut self, definition: TypeId, args: Vec<TypeId>) -> TypeId {
        self.symbols
            .intern_generic(definition, args)
            .expect("generic definition exists")
    }

    fn with_interfaces(&mut self, ty: TypeId, interfaces: Vec<TypeId>) -> TypeId {
        if let Some(info) = self.symbols.ty_mut(ty) {
            info.interfaces = interfaces;
        }
        ty
    }

    pub fn enumerable_of(&mut self, element: TypeId) -> TypeId {
        self.generic(self.types.enumerable_def, vec![element])
    }

    pub fn queryable_of(&mut self, element: TypeId) -> TypeId {
        let enumerable = self.enumerable_of(element);
        let ty = self.generic(self.types.queryable_def, vec![element]);
        self.with_interfaces(ty, vec![enumerable])
    }

    pub fn ordered_of(&mut self, element: TypeId) -> TypeId {
        let queryable = self.queryable_of(element);
        let ty = self.generic(self.types.ordered_queryable_def, vec![element]);
        self.with_interfaces(ty, vec![queryable])
    }

    pub fn list_of(&mut self, element: TypeId) -> TypeId {
        let enumerable = self.enumerable_of(element);
        let ty = self.generic(self.types.list_def, vec![element]);
        self.with_interfaces(ty, vec![enumerable])
    }

    pub fn db_set_type(&mut self, entity: TypeId) -> TypeId {
        let queryable = self.queryable_of(entity);
        let ty = self.generic(self.types.db_set_def, vec![entity]);
        self.with_interfaces(ty, vec![queryable])
    }

    pub fn grouping_of(&mut self, key: TypeId, element: TypeId) -> TypeId {
        let enumerable = self.enumerable_of(element);
        let ty = self.generic(self.types.grouping_def, vec![key, element]);
        self.with_interfaces(ty, vec![enumerable])
    }

    /// Entity class in the `App` namespace; reused when it already exists.
    /// Properties ending in `Id` are `int`, the rest `string`.
    pub fn entity(&mut self, name: &str, properties: &[&str]) -> TypeId {
        let ty = match self.symbols.type_by_name(name, APP) {
            Some(ty) => ty,
            None => {
                let mut info = TypeInfo::new(name, APP, TypeKind::Class);
                info.base = Some(self.types.object);
                self.symbols.add_type(info)
            }
        };
        for &property in properties {
            if self.symbols.find_member(ty, property).is_none() {
                let prop_ty = if property.ends_with("Id") {
                    self.types.int
                } else {
                    self.types.string
                };
                self.add_property(ty, property, prop_ty);
            }
        }
        ty
    }

    pub fn add_property(&mut self, owner: TypeId, name: &str, ty: TypeId) -> SymbolId {
        let mut symbol = Symbol::new(name, SymbolKind::Property);
        symbol.ty = Some(ty);
        symbol.containing_type = Some(owner);
        self.symbols.add_symbol(symbol)
    }

    pub fn add_attribute(&mut self, ty: TypeId, member: &str, attribute: &str) {
        if let Some(id) = self.symbols.find_member(ty, member) {
            if let Some(symbol) = self.symbols.symbol_mut(id) {
                symbol.attributes.push(Attribute::new(attribute));
            }
        }
    }

    pub fn add_member_attribute(&mut self, ty: TypeId, member: &str, attribute: Attribute) {
        if let Some(id) = self.symbols.find_member(ty, member) {
            if let Some(symbol) = self.symbols.symbol_mut(id) {
                symbol.attributes.push(attribute);
            }
        }
    }

    pub fn add_type_attribute(&mut self, ty: TypeId, attribute: Attribute) {
        if let Some(info) = self.symbols.ty_mut(ty) {
            info.attributes.push(attribute);
        }
    }

    // Declarations

    /// `public DbSet<E> Name { get; set; }`, attached to a context by [`context_class`](Self::context_class)
    pub fn set_property(&mut self, name: &str, entity: TypeId) -> NodeId {
        let set = self.db_set_type(entity);
        let mut symbol = Symbol::new(name, SymbolKind::Property);
        symbol.ty = Some(set);
        let id = self.symbols.add_symbol(symbol);
        let annotation = self.symbols.display(set);
        let node = self.b.property(&annotation, name);
        self.b.modifiers(node, &["public"]);
        self.b.bind(node, id);
        self.declare(id, node);
        node
    }

    fn declare(&mut self, symbol: SymbolId, node: NodeId) {
        if let Some(s) = self.symbols.symbol_mut(symbol) {
            s.declaration = Some(node);
        }
    }

    /// Declared context class deriving `DbContext`
    pub fn context_class(&mut self, name: &str, members: Vec<NodeId>) -> NodeId {
        let ty = match self.symbols.type_by_name(name, APP) {
            Some(ty) => ty,
            None => {
                let mut info = TypeInfo::new(name, APP, TypeKind::Class);
                info.base = Some(self.types.db_context);
                self.symbols.add_type(info)
            }
        };
        self.declare_class(ty, Some("DbContext"), members)
    }

    /// Class node for `ty` holding `members`; unowned member symbols join `ty`
    pub fn declare_class(&mut self, ty: TypeId, bases: Option<&str>, members: Vec<NodeId>) -> NodeId {
        for &member in &members {
            let Some(symbol) = self.b.node(member).symbol else {
                continue;
            };
            let unowned = self
                .symbols
                .symbol(symbol)
                .is_some_and(|s| s.containing_type.is_none());
            if unowned {
                if let Some(s) = self.symbols.symbol_mut(symbol) {
                    s.containing_type = Some(ty);
                }
                if let Some(info) = self.symbols.ty_mut(ty) {
                    info.members.push(symbol);
                }
            }
        }
        let name = self
            .symbols
            .ty(ty)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        let node = self.b.class(&name, bases, members);
        self.b.modifiers(node, &["public"]);
        if let Some(info) = self.symbols.ty_mut(ty) {
            info.declaration = Some(node);
        }
        node
    }

    /// Class declaration for an entity with one auto-property per member
    pub fn entity_decl(&mut self, ty: TypeId) -> NodeId {
        let members: Vec<SymbolId> = self
            .symbols
            .ty(ty)
            .map(|t| t.members.clone())
            .unwrap_or_default();
        let mut nodes = Vec::new();
        for member in members {
            let Some(symbol) = self.symbols.symbol(member).cloned() else {
                continue;
            };
            if symbol.kind != SymbolKind::Property {
                continue;
            }
            let annotation = symbol
                .ty
                .map(|t| self.source_type_name(t))
                .unwrap_or_else(|| "object".to_string());
            let node = self.b.property(&annotation, &symbol.name);
            self.b.modifiers(node, &["public"]);
            self.b.bind(node, member);
            self.declare(member, node);
            nodes.push(node);
        }
        self.declare_class(ty, None, nodes)
    }

    fn source_type_name(&self, ty: TypeId) -> String {
        if ty == self.types.int {
            "int".to_string()
        } else if ty == self.types.string {
            "string".to_string()
        } else {
            self.symbols.display(ty)
        }
    }

    /// Method declared on `Service`, bound to a fresh method symbol
    pub fn service_method(&mut self, ret: &str, name: &str, params: Vec<NodeId>, body: NodeId) -> NodeId {
        let mut symbol = Symbol::new(name, SymbolKind::Method);
        symbol.containing_type = Some(self.types.service);
        let id = self.symbols.add_symbol(symbol);
        let node = self.b.method(ret, name, params, body);
        self.b.modifiers(node, &["public"]);
        self.b.bind(node, id);
        self.declare(id, node);
        node
    }

    /// Typed parameter bound to a parameter symbol
    pub fn param(&mut self, annotation: &str, name: &str, ty: TypeId) -> NodeId {
        let mut symbol = Symbol::new(name, SymbolKind::Parameter);
        symbol.ty = Some(ty);
        let id = self.symbols.add_symbol(symbol);
        self.locals.insert(name.to_string(), id);
        let node = self.b.typed_param(annotation, name);
        self.b.bind(node, id);
        self.declare(id, node);
        node
    }

    /// `var name = init;` bound to a local symbol typed like `init`
    pub fn decl_local(&mut self, name: &str, init: NodeId) -> NodeId {
        let ty = self.type_of(init);
        let id = self.local_symbol(name, ty);
        let node = self.b.local(name, Some(init));
        self.b.bind(node, id);
        self.declare(id, node);
        node
    }

    /// `foreach (var name in collection) body`, the loop variable bound to a local
    pub fn foreach(&mut self, name: &str, collection: NodeId, body: NodeId) -> NodeId {
        let element = self
            .type_of(collection)
            .and_then(|t| ef::element_type(&self.symbols, t));
        let id = self.local_symbol(name, element);
        let node = self.b.foreach(name, collection, body);
        self.b.bind(node, id);
        self.declare(id, node);
        node
    }

    fn local_symbol(&mut self, name: &str, ty: Option<TypeId>) -> SymbolId {
        if let Some(&id) = self.locals.get(name) {
            return id;
        }
        let mut symbol = Symbol::new(name, SymbolKind::Local);
        symbol.ty = ty;
        let id = self.symbols.add_symbol(symbol);
        self.locals.insert(name.to_string(), id);
        id
    }

    // Expressions

    /// Reference to a local or parameter by name
    pub fn local(&mut self, name: &str, ty: TypeId) -> NodeId {
        let id = self.local_symbol(name, Some(ty));
        self.use_symbol(id)
    }

    /// Identifier bound to `symbol`, typed with its declared type
    pub fn use_symbol(&mut self, symbol: SymbolId) -> NodeId {
        let (name, ty) = match self.symbols.symbol(symbol) {
            Some(s) => (s.name.clone(), s.ty),
            None => (String::from("?"), None),
        };
        let node = self.b.ident(&name);
        self.b.bind(node, symbol);
        if let Some(ty) = ty {
            self.b.typed(node, ty);
        }
        node
    }

    /// Local typed as the `AppDb` context
    pub fn context_local(&mut self, name: &str) -> NodeId {
        let ty = self.types.app_db;
        self.local(name, ty)
    }

    /// `ctx.Users`: mapped set property, entity named by dropping the plural `s`
    pub fn db_set(&mut self, ctx: NodeId, set: &str) -> NodeId {
        let entity_name = set.strip_suffix('s').unwrap_or(set);
        let entity = self.entity(entity_name, &["Id"]);
        let set_ty = self.db_set_type(entity);
        let context = self.type_of(ctx).unwrap_or(self.types.app_db);
        let member = match self.symbols.find_member(context, set) {
            Some(member) => member,
            None => self.add_property(context, set, set_ty),
        };
        let node = self.b.member(ctx, set);
        self.b.bind(node, member);
        self.b.typed(node, set_ty)
    }

    /// `instance.Name`, bound when `Name` is a member of the instance type
    pub fn member_of(&mut self, instance: NodeId, name: &str) -> NodeId {
        let node = self.b.member(instance, name);
        let member = self
            .type_of(instance)
            .and_then(|t| self.symbols.find_member(t, name));
        if let Some(member) = member {
            self.b.bind(node, member);
            if let Some(ty) = self.symbols.symbol(member).and_then(|s| s.ty) {
                self.b.typed(node, ty);
            }
        }
        node
    }

    /// Lambda with one parameter typed `ty`; `body` receives the parameter symbol
    pub fn lambda1(
        &mut self,
        name: &str,
        ty: Option<TypeId>,
        body: impl FnOnce(&mut World, SymbolId) -> NodeId,
    ) -> NodeId {
        let mut symbol = Symbol::new(name, SymbolKind::Parameter);
        symbol.ty = ty;
        let id = self.symbols.add_symbol(symbol);
        let param = self.b.param(name);
        self.b.bind(param, id);
        self.declare(id, param);
        let body = body(self, id);
        self.b.lambda(vec![param], body)
    }

    /// `x => x.Member` over the element type of `query`
    pub fn key_lambda(&mut self, query: NodeId, member: &str) -> NodeId {
        let element = self.element_of(query);
        self.lambda1("x", element, |w, x| {
            let x = w.use_symbol(x);
            w.member_of(x, member)
        })
    }

    pub fn type_of(&self, id: NodeId) -> Option<TypeId> {
        self.b.node(self.unwrap(id)).ty
    }

    fn unwrap(&self, mut id: NodeId) -> NodeId {
        while matches!(
            self.b.node(id).kind,
            NodeKind::Conversion | NodeKind::Parenthesized | NodeKind::DelegateCreation
        ) {
            match self.b.node(id).children.first() {
                Some(&inner) => id = inner,
                None => break,
            }
        }
        id
    }

    pub fn element_of(&self, query: NodeId) -> Option<TypeId> {
        self.type_of(query)
            .and_then(|t| ef::element_type(&self.symbols, t))
    }

    fn method_symbol(
        &mut self,
        owner: TypeId,
        name: &str,
        args: &[NodeId],
        extension: bool,
        ret: Option<TypeId>,
    ) -> SymbolId {
        let key = (owner, name.to_string(), args.len() + usize::from(extension) * 100);
        if let Some(&id) = self.methods.get(&key) {
            return id;
        }
        let token = self.types.cancellation_token;
        let mut symbol = Symbol::new(name, SymbolKind::Method);
        symbol.containing_type = Some(owner);
        symbol.ty = ret;
        symbol.is_extension = extension;
        symbol.is_static = extension;
        if extension {
            symbol.parameters.push(ParameterInfo {
                name: "source".to_string(),
                ty: None,
                is_extension_receiver: true,
                is_optional: false,
            });
        }
        let mut has_token = false;
        for (i, &arg) in args.iter().enumerate() {
            let ty = self.type_of(arg).filter(|&t| t == token);
            has_token |= ty.is_some();
            symbol.parameters.push(ParameterInfo {
                name: if ty.is_some() {
                    "cancellationToken".to_string()
                } else {
                    format!("arg{}", i)
                },
                ty,
                is_extension_receiver: false,
                is_optional: ty.is_some(),
            });
        }
        let owner_ns = self
            .symbols
            .ty(owner)
            .map(|t| t.namespace.clone())
            .unwrap_or_default();
        if name.ends_with("Async") && owner_ns.starts_with(EF_CORE) && !has_token {
            symbol.parameters.push(ParameterInfo {
                name: "cancellationToken".to_string(),
                ty: Some(token),
                is_extension_receiver: false,
                is_optional: true,
            });
        }
        let id = self.symbols.add_symbol(symbol);
        self.methods.insert(key, id);
        id
    }

    /// Extension call in receiver form, bound to `owner.name`
    pub fn ext_call(
        &mut self,
        receiver: NodeId,
        owner: TypeId,
        name: &str,
        args: Vec<NodeId>,
        ret: Option<TypeId>,
    ) -> NodeId {
        let method = self.method_symbol(owner, name, &args, true, ret);
        let node = self.b.call(Some(receiver), name, args);
        self.b.bind(node, method);
        if let Some(ret) = ret {
            self.b.typed(node, ret);
        }
        node
    }

    /// Instance call `receiver.name(args)` bound to a method of `owner`
    pub fn instance_call(
        &mut self,
        receiver: NodeId,
        owner: TypeId,
        name: &str,
        args: Vec<NodeId>,
        ret: Option<TypeId>,
    ) -> NodeId {
        let method = self.method_symbol(owner, name, &args, false, ret);
        let node = self.b.call(Some(receiver), name, args);
        self.b.bind(node, method);
        if let Some(ret) = ret {
            self.b.typed(node, ret);
        }
        node
    }

    /// Linq or EF operator call on a sequence, with a plausible result type
    pub fn queryable_call(&mut self, query: NodeId, name: &str, args: Vec<NodeId>) -> NodeId {
        let input = self.type_of(query);
        let lazy = input.is_some_and(|t| ef::is_queryable(&self.symbols, t));
        let element = self.element_of(query).unwrap_or(self.types.object);
        let sync = name.strip_suffix("Async").unwrap_or(name);
        let sequence = if lazy {
            self.queryable_of(element)
        } else {
            self.enumerable_of(element)
        };

        let ret = match sync {
            "ToList" | "ToArray" | "ToHashSet" | "ToDictionary" | "ToLookup" => self.list_of(element),
            "Count" | "LongCount" | "Sum" | "Min" | "Max" | "Average" | "ExecuteDelete"
            | "ExecuteUpdate" => self.types.int,
            "Any" | "All" | "Contains" => self.types.bool,
            "First" | "FirstOrDefault" | "Single" | "SingleOrDefault" | "Last" | "LastOrDefault"
            | "ElementAt" | "ElementAtOrDefault" | "Find" => element,
            "OrderBy" | "OrderByDescending" | "ThenBy" | "ThenByDescending" if lazy => {
                self.ordered_of(element)
            }
            "AsEnumerable" => self.enumerable_of(element),
            _ => sequence,
        };

        let owner = if RELATIONAL_OPERATORS.contains(&sync) {
            self.types.relational_extensions
        } else if EF_OPERATORS.contains(&sync) || name.ends_with("Async") {
            self.types.ef_extensions
        } else if lazy && sync != "AsEnumerable" {
            self.types.linq_queryable
        } else {
            self.types.linq_enumerable
        };
        self.ext_call(query, owner, name, args, Some(ret))
    }

    /// Operator call with one integer literal argument
    pub fn queryable_call_n(&mut self, query: NodeId, name: &str, n: i64) -> NodeId {
        let literal = self.b.literal(&n.to_string());
        self.typed_literal(literal, self.types.int);
        self.queryable_call(query, name, vec![literal])
    }

    fn typed_literal(&mut self, literal: NodeId, ty: TypeId) {
        self.b.typed(literal, ty);
    }

    /// `"text"` typed as string
    pub fn string_literal(&mut self, text: &str) -> NodeId {
        let literal = self.b.literal(&format!("\"{}\"", text));
        self.b.typed(literal, self.types.string)
    }

    pub fn int_literal(&mut self, n: i64) -> NodeId {
        let literal = self.b.literal(&n.to_string());
        self.b.typed(literal, self.types.int)
    }

    /// `q.Where(x => x.Active)`
    pub fn where_call(&mut self, query: NodeId) -> NodeId {
        let lambda = self.key_lambda(query, "Active");
        self.queryable_call(query, "Where", vec![lambda])
    }

    /// `q.OrderBy(x => x.Key)`
    pub fn order_by(&mut self, query: NodeId, key: &str) -> NodeId {
        let lambda = self.key_lambda(query, key);
        self.queryable_call(query, "OrderBy", vec![lambda])
    }

    /// `DateTime.Now` or `DateTime.UtcNow`
    pub fn date_time_now(&mut self, property: &str) -> NodeId {
        let date_time = self.types.date_time;
        let member = match self.symbols.find_member(date_time, property) {
            Some(member) => member,
            None => {
                let id = self.add_property(date_time, property, date_time);
                if let Some(s) = self.symbols.symbol_mut(id) {
                    s.is_static = true;
                }
                id
            }
        };
        let ty = self.b.type_name("DateTime");
        self.b.typed(ty, date_time);
        let node = self.b.member(ty, property);
        self.b.bind(node, member);
        self.b.typed(node, date_time)
    }

    /// `new List<T>(seq)`
    pub fn new_list(&mut self, seq: NodeId) -> NodeId {
        let element = self.element_of(seq).unwrap_or(self.types.object);
        let list = self.list_of(element);
        let enumerable = self.enumerable_of(element);
        let mut ctor = Symbol::new(".ctor", SymbolKind::Constructor);
        ctor.containing_type = Some(list);
        ctor.parameters.push(ParameterInfo {
            name: "collection".to_string(),
            ty: Some(enumerable),
            is_extension_receiver: false,
            is_optional: false,
        });
        let ctor = self.symbols.add_symbol(ctor);
        let annotation = self.symbols.display(list);
        let node = self.b.object_creation(&annotation, vec![seq]);
        self.b.bind(node, ctor);
        self.b.typed(node, list)
    }

    /// `ctx.SaveChanges()` or `ctx.SaveChangesAsync()`
    pub fn save_changes(&mut self, ctx: NodeId, name: &str) -> NodeId {
        let owner = self.types.db_context;
        let ret = self.types.int;
        self.instance_call(ctx, owner, name, vec![], Some(ret))
    }

    /// Call on the context itself, e.g. `ctx.Update(entity)`
    pub fn context_call(&mut self, ctx: NodeId, name: &str, args: Vec<NodeId>) -> NodeId {
        let owner = self.types.db_context;
        self.instance_call(ctx, owner, name, args, None)
    }

    /// `ctx.Entry(entity)`
    pub fn entry(&mut self, ctx: NodeId, entity: NodeId) -> NodeId {
        let owner = self.types.db_context;
        let ret = self.types.entity_entry;
        self.instance_call(ctx, owner, "Entry", vec![entity], Some(ret))
    }

    // Finishing

    /// `class Service { void Run() { expr; } }`
    pub fn finish_expr(mut self, expr: NodeId) -> Unit {
        let stmt = self.b.expr_stmt(expr);
        self.finish_stmts(vec![stmt])
    }

    /// Statements as the body of `void Run()` on `Service`
    pub fn finish_stmts(mut self, stmts: Vec<NodeId>) -> Unit {
        let body = self.b.block(stmts);
        let method = self.service_method("void", "Run", vec![], body);
        self.finish_method(method)
    }

    /// Statements as the body of `async Task Run()` on `Service`
    pub fn finish_async_stmts(mut self, stmts: Vec<NodeId>) -> Unit {
        let body = self.b.block(stmts);
        let method = self.service_method("Task", "Run", vec![], body);
        self.b.set_async(method);
        self.finish_method(method)
    }

    /// A method as the only member of `Service`
    pub fn finish_method(self, method: NodeId) -> Unit {
        self.finish_members(vec![method])
    }

    /// Members of `Service`
    pub fn finish_members(mut self, members: Vec<NodeId>) -> Unit {
        let service = self.types.service;
        let class = self.declare_class(service, None, members);
        self.finish_items(vec![class])
    }

    /// Top-level items of the compilation unit
    pub fn finish_items(mut self, items: Vec<NodeId>) -> Unit {
        let root = self.b.unit(items);
        let tree = self.b.finish(root).expect("fixture tree is well formed");
        Unit::new(PathBuf::from("src/Service.json"), tree, self.symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixture_renders_query() {
        let mut w = World::new();
        let db = w.context_local("db");
        let users = w.db_set(db, "Users");
        let filtered = w.where_call(users);
        let list = w.queryable_call(filtered, "ToList", vec![]);
        let unit = w.finish_expr(list);

        assert_eq!(
            unit.source(),
            "public class Service {\n    public void Run() {\n        db.Users.Where(x => x.Active).ToList();\n    }\n}"
        );
        let ty = unit.tree.node(list).ty.unwrap();
        assert_eq!(unit.symbols.display(ty), "List<User>");
    }
}
