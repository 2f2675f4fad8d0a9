//! Entity model and context lifetime

use super::{source_type_name, type_declared_at};
use crate::diagnostic::{Diagnostic, FixSafety, Severity};
use crate::ef::{self, EF_CORE, SYSTEM};
use crate::rewrite::{Edit, NameScope, NewNode, Rename, Rewrite, SymbolEdit, Template, TypeTarget};
use crate::rule::{FixMeta, Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
use crate::symbols::{Accessibility, Symbol, SymbolId, SymbolKind, TypeId};
use crate::tree::{NodeFlags, NodeId, NodeKind};

/// `public {ty} {name} { get; set; }` plus the member symbol backing it
fn synthesized_property(
    cx: &RuleContext<'_>,
    owner: TypeId,
    name: &str,
    ty: Option<TypeId>,
) -> (Template, SymbolEdit) {
    let annotation = ty
        .map(|t| source_type_name(cx.symbols, t))
        .unwrap_or_else(|| "int".to_string());
    let mut member = Symbol::new(name, SymbolKind::Property);
    member.ty = ty;
    member.accessibility = Accessibility::Public;
    let node = Template::auto_property(&annotation, name)
        .bind_added(0)
        .typed(ty)
        .build();
    (node, SymbolEdit::AddMember { owner, member })
}

// LC011

static MISSING_PRIMARY_KEY: RuleMeta = RuleMeta {
    id: "LC011",
    name: "missing-primary-key",
    severity: Severity::Warning,
    category: RuleCategory::Correctness,
    stability: RuleStability::Stable,
    description: "Declares a mapped entity without a primary key",
    rationale: Some(
        "EF Core needs a key to track an entity. Without one the model fails to build, \
         unless the type is explicitly marked [Keyless].",
    ),
    message: "Entity '{0}' does not have a primary key defined by convention (Id, {0}Id), attributes ([Key], [PrimaryKey]), or [Keyless] opt-out",
    kinds: &[NodeKind::TypeDecl],
    fix: Some(FixMeta {
        title: "Add an 'Id' key property",
        safety: FixSafety::Safe,
    }),
};

pub struct MissingPrimaryKey;

impl MissingPrimaryKey {
    fn keyless_entity(cx: &RuleContext<'_>, class: NodeId) -> Option<TypeId> {
        let entity = type_declared_at(cx.symbols, class)?;
        if !ef::mapped_entities(cx.symbols).contains(&entity) || ef::has_identity(cx.symbols, entity) {
            return None;
        }
        let configured = ef::declared_contexts(cx.symbols)
            .into_iter()
            .any(|context| ef::has_fluent_key(cx.tree, cx.symbols, context, entity));
        (!configured).then_some(entity)
    }
}

impl Rule for MissingPrimaryKey {
    fn meta(&self) -> &'static RuleMeta {
        &MISSING_PRIMARY_KEY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        if Self::keyless_entity(cx, node).is_none() {
            return vec![];
        }
        vec![cx.report(&MISSING_PRIMARY_KEY, node, vec![cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let class = diagnostic.node?;
        let entity = Self::keyless_entity(cx, class)?;
        let title = MISSING_PRIMARY_KEY.fix.map(|f| f.title)?;
        let int = cx.symbols.type_by_name("Int32", SYSTEM);
        let (property, member) = synthesized_property(cx, entity, "Id", int);
        Some(
            Rewrite::new(title, FixSafety::Safe)
                .edit(Edit::Prepend {
                    parent: class,
                    node: property,
                })
                .symbol_edit(member),
        )
    }
}

// LC027

static IMPLICIT_FOREIGN_KEY: RuleMeta = RuleMeta {
    id: "LC027",
    name: "implicit-foreign-key",
    severity: Severity::Info,
    category: RuleCategory::Style,
    stability: RuleStability::Stable,
    description: "Declares a reference navigation without a foreign key property",
    rationale: Some(
        "Without an explicit foreign key EF Core creates a shadow property. Reading or \
         setting the relationship then requires loading the related entity.",
    ),
    message: "Navigation property '{0}' has no explicit foreign key property. Consider adding '{0}Id' for better performance and API ergonomics.",
    kinds: &[NodeKind::Property],
    fix: Some(FixMeta {
        title: "Add the foreign key property",
        safety: FixSafety::Safe,
    }),
};

pub struct ImplicitForeignKey;

impl ImplicitForeignKey {
    /// Navigation symbol, its declaring entity, and the referenced entity
    fn navigation<'a>(
        cx: &RuleContext<'a>,
        property: NodeId,
    ) -> Option<(&'a Symbol, TypeId, TypeId)> {
        let symbol = cx.symbol(property)?;
        if symbol.kind != SymbolKind::Property
            || symbol.accessibility != Accessibility::Public
            || symbol.is_static
        {
            return None;
        }
        let owner = symbol.containing_type?;
        let target = symbol.ty?;
        if ef::is_enumerable(cx.symbols, target) {
            return None;
        }
        let entities = ef::mapped_entities(cx.symbols);
        (entities.contains(&owner) && entities.contains(&target)).then_some((symbol, owner, target))
    }

    fn has_explicit_key(cx: &RuleContext<'_>, navigation: &Symbol, owner: TypeId, target: TypeId) -> bool {
        if navigation.has_attribute("ForeignKey") {
            return true;
        }
        let target_name = cx.symbols.ty(target).map(|t| t.name.as_str()).unwrap_or_default();
        let candidates = [
            format!("{}Id", navigation.name),
            format!("{}Id", target_name),
        ];
        cx.symbols
            .members(owner)
            .into_iter()
            .filter_map(|m| cx.symbols.symbol(m))
            .any(|member| {
                candidates.iter().any(|c| member.name.eq_ignore_ascii_case(c))
                    || member.attributes.iter().any(|a| {
                        a.is("ForeignKey")
                            && a.args.first().is_some_and(|arg| names_member(arg, &navigation.name))
                    })
            })
    }
}

/// `"Nav"` or `nameof(Nav)`
fn names_member(arg: &str, name: &str) -> bool {
    let arg = arg.trim();
    let inner = arg
        .strip_prefix("nameof(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(arg);
    inner.trim_matches('"') == name
}

impl Rule for ImplicitForeignKey {
    fn meta(&self) -> &'static RuleMeta {
        &IMPLICIT_FOREIGN_KEY
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some((navigation, owner, target)) = Self::navigation(cx, node) else {
            return vec![];
        };
        if Self::has_explicit_key(cx, navigation, owner, target) {
            return vec![];
        }
        vec![cx.report(&IMPLICIT_FOREIGN_KEY, node, vec![navigation.name.clone()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let property = diagnostic.node?;
        let (navigation, owner, target) = Self::navigation(cx, property)?;
        let title = IMPLICIT_FOREIGN_KEY.fix.map(|f| f.title)?;
        // Typed after the target's key, int when it has none we can see
        let key_type = ef::primary_key(cx.symbols, target)
            .and_then(|k| cx.symbols.symbol(k))
            .and_then(|k| k.ty)
            .or_else(|| cx.symbols.type_by_name("Int32", SYSTEM));
        let name = format!("{}Id", navigation.name);
        let (node, member) = synthesized_property(cx, owner, &name, key_type);
        Some(
            Rewrite::new(title, FixSafety::Safe)
                .edit(Edit::InsertBefore {
                    anchor: property,
                    node,
                })
                .symbol_edit(member),
        )
    }
}

// LC030

static LONG_LIVED_CONTEXT: RuleMeta = RuleMeta {
    id: "LC030",
    name: "long-lived-context",
    severity: Severity::Warning,
    category: RuleCategory::Suspicious,
    stability: RuleStability::Stable,
    description: "Stores a DbContext in a field or property of a service",
    rationale: Some(
        "A DbContext is a unit of work and is not thread safe. Services that outlive a \
         request should create short-lived contexts through IDbContextFactory.",
    ),
    message: "The class '{0}' holds a 'DbContext' in field '{1}'. Ensure this class is registered with a Scoped lifetime, not Singleton, to avoid threading and memory issues.",
    kinds: &[NodeKind::Field, NodeKind::Property],
    fix: Some(FixMeta {
        title: "Inject IDbContextFactory instead",
        safety: FixSafety::Unsafe,
    }),
};

/// Base type name suffixes of request-scoped hosts
const SCOPED_HOSTS: &[&str] = &["Controller", "ControllerBase", "ViewComponent", "PageModel"];

const FACTORY_TYPE: &str = "IDbContextFactory";

pub struct LongLivedContext;

impl LongLivedContext {
    /// Member symbol, its context type, and the holder type
    fn held_context(cx: &RuleContext<'_>, member: NodeId) -> Option<(SymbolId, TypeId, TypeId)> {
        let id = cx.tree.node(member).symbol?;
        let symbol = cx.symbols.symbol(id)?;
        if symbol.is_static || !matches!(symbol.kind, SymbolKind::Field | SymbolKind::Property) {
            return None;
        }
        let context = symbol.ty.filter(|&t| ef::is_db_context(cx.symbols, t))?;
        let holder = symbol.containing_type?;
        if ef::is_db_context(cx.symbols, holder) {
            return None;
        }
        let scoped = cx
            .symbols
            .base_chain(holder)
            .into_iter()
            .filter_map(|t| cx.symbols.ty(t))
            .any(|t| SCOPED_HOSTS.iter().any(|suffix| t.name.ends_with(suffix)));
        (!scoped).then_some((id, context, holder))
    }

    /// Constructor parameters assigned to `member` inside `constructor`
    fn assigned_parameters(cx: &RuleContext<'_>, constructor: NodeId, member: SymbolId) -> Vec<SymbolId> {
        let mut found = Vec::new();
        for assignment in cx
            .tree
            .descendants(constructor)
            .filter(|&n| cx.kind(n) == NodeKind::Assignment)
        {
            let (Some(target), Some(value)) = (cx.tree.child(assignment, 0), cx.tree.child(assignment, 1))
            else {
                continue;
            };
            let target = cx.tree.unwrap_transparent(target);
            let value = cx.tree.unwrap_transparent(value);
            if cx.tree.node(target).symbol != Some(member) {
                continue;
            }
            let parameter = cx
                .tree
                .node(value)
                .symbol
                .filter(|&s| cx.symbols.symbol(s).is_some_and(|p| p.kind == SymbolKind::Parameter));
            if let Some(parameter) = parameter {
                if !found.contains(&parameter) {
                    found.push(parameter);
                }
            }
        }
        found
    }

    fn is_constructor(cx: &RuleContext<'_>, method: NodeId) -> bool {
        cx.kind(method) == NodeKind::Method && cx.tree.node(method).annotation.is_none()
    }

    /// Declaration copy under a new name and type annotation
    fn redeclared(cx: &RuleContext<'_>, declaration: NodeId, name: &str, annotation: &str) -> Template {
        Template::copy(cx.tree, declaration)
            .text(name)
            .annotation(annotation)
            .build()
    }
}

impl Rule for LongLivedContext {
    fn meta(&self) -> &'static RuleMeta {
        &LONG_LIVED_CONTEXT
    }

    fn check(&self, cx: &RuleContext<'_>, node: NodeId) -> Vec<Diagnostic> {
        let Some((_, _, holder)) = Self::held_context(cx, node) else {
            return vec![];
        };
        let class = cx
            .symbols
            .ty(holder)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        vec![cx.report(&LONG_LIVED_CONTEXT, node, vec![class, cx.name(node).to_string()])]
    }

    fn fix(&self, cx: &RuleContext<'_>, diagnostic: &Diagnostic) -> Option<Rewrite> {
        let declaration = diagnostic.node?;
        let (member, context, _) = Self::held_context(cx, declaration)?;
        let title = LONG_LIVED_CONTEXT.fix.map(|f| f.title)?;
        let member_name = cx.name(declaration);
        let factory_name = format!("{}Factory", member_name);
        let factory_annotation = format!("{}<{}>", FACTORY_TYPE, source_type_name(cx.symbols, context));
        let factory_type = || TypeTarget::Generic {
            name: FACTORY_TYPE.to_string(),
            namespace: EF_CORE.to_string(),
            args: vec![context],
        };

        let mut rewrite = Rewrite::new(title, FixSafety::Unsafe)
            .symbol_edit(SymbolEdit::Rename {
                symbol: member,
                name: factory_name.clone(),
            })
            .symbol_edit(SymbolEdit::Retype {
                symbol: member,
                to: factory_type(),
            });

        // Phase one: every use of the member, sorted by the function it sits in
        let rename = Rename::collect(cx.tree, cx.symbols, member, &factory_name);
        let mut constructors = Vec::new();
        let mut scoped_uses: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
        for &reference in &rename.references {
            if reference == declaration {
                continue;
            }
            match cx.tree.enclosing_method(reference) {
                Some(method) if Self::is_constructor(cx, method) => {
                    rewrite = rewrite.replace(reference, rename.renamed(cx.tree, reference));
                    if !constructors.contains(&method) {
                        constructors.push(method);
                    }
                }
                Some(method) => match scoped_uses.iter_mut().find(|(m, _)| *m == method) {
                    Some((_, uses)) => uses.push(reference),
                    None => scoped_uses.push((method, vec![reference])),
                },
                None => rewrite = rewrite.replace(reference, rename.renamed(cx.tree, reference)),
            }
        }
        rewrite = rewrite.replace(
            declaration,
            Self::redeclared(cx, declaration, &factory_name, &factory_annotation),
        );

        // Constructor parameters feeding the member become factories too
        for &constructor in &constructors {
            for parameter in Self::assigned_parameters(cx, constructor, member) {
                let name = format!("{}Factory", cx.symbols.symbol(parameter)?.name);
                let renamed = Rename::collect(cx.tree, cx.symbols, parameter, &name);
                for &reference in &renamed.references {
                    let with = if cx.kind(reference) == NodeKind::Parameter {
                        Self::redeclared(cx, reference, &name, &factory_annotation)
                    } else {
                        renamed.renamed(cx.tree, reference)
                    };
                    rewrite = rewrite.replace(reference, with);
                }
                rewrite = rewrite
                    .symbol_edit(renamed.symbol_edit())
                    .symbol_edit(SymbolEdit::Retype {
                        symbol: parameter,
                        to: factory_type(),
                    });
            }
        }

        // Phase two: other methods open their own context from the factory
        let base = member_name.trim_matches('_');
        let base = if base.is_empty() { "context" } else { base };
        for (method, uses) in scoped_uses {
            let body = cx.tree.body(method).filter(|&b| cx.kind(b) == NodeKind::Block)?;
            let local = NameScope::for_scope(cx.tree, method).fresh(base);
            let create = Template::call(
                Some(
                    NewNode::new(NodeKind::Identifier)
                        .text(&factory_name)
                        .bind(member)
                        .build(),
                ),
                "CreateDbContext",
                vec![],
            );
            let opened = NewNode::new(NodeKind::LocalDecl)
                .text(&local)
                .flags(NodeFlags {
                    is_using: true,
                    ..NodeFlags::default()
                })
                .typed(Some(context))
                .child(create)
                .build();
            rewrite = rewrite.edit(Edit::Prepend {
                parent: body,
                node: opened,
            });
            for reference in uses {
                let with = NewNode::new(NodeKind::Identifier)
                    .text(&local)
                    .typed(Some(context))
                    .build();
                rewrite = rewrite.replace(reference, with);
            }
        }

        let root = cx.tree.root();
        let imported = cx
            .tree
            .children(root)
            .iter()
            .any(|&c| cx.kind(c) == NodeKind::UsingDirective && cx.name(c) == EF_CORE);
        if !imported {
            rewrite = rewrite.edit(Edit::Prepend {
                parent: root,
                node: Template::using_directive(EF_CORE),
            });
        }
        Some(rewrite)
    }
}

#[cfg(test)]
mod tests {
    use crate::ef::EF_CORE;
    use crate::rules::test_support::{diagnose, fix_first};
    use crate::symbols::{Accessibility, Attribute, Symbol, SymbolKind, TypeInfo, TypeKind};
    use crate::testing::World;
    use crate::tree::NodeId;
    use pretty_assertions::assert_eq;

    /// `AppDb` mapping `Users` and `Orders`
    fn context_with_orders(w: &mut World, extra: Vec<NodeId>) -> NodeId {
        let user = w.entity("User", &["Id"]);
        let order = w.entity("Order", &[]);
        let users = w.set_property("Users", user);
        let orders = w.set_property("Orders", order);
        let mut members = vec![users, orders];
        members.extend(extra);
        w.context_class("AppDb", members)
    }

    #[test]
    fn test_entity_without_key() {
        let mut w = World::new();
        let order = w.entity("Order", &["Name"]);
        let context = context_with_orders(&mut w, vec![]);
        let class = w.entity_decl(order);
        let unit = w.finish_items(vec![context, class]);

        let found = diagnose(&unit, "LC011");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Order".to_string()]);
        assert!(found[0].message.contains("(Id, OrderId)"));

        let fixed = fix_first(&unit, "LC011");
        assert!(
            fixed.source().ends_with(
                "public class Order {\n    public int Id { get; set; }\n    public string Name { get; set; }\n}"
            ),
            "{}",
            fixed.source()
        );
        assert!(diagnose(&fixed, "LC011").is_empty());
    }

    #[test]
    fn test_keyless_and_conventional_keys_are_fine() {
        let mut w = World::new();
        let order = w.entity("Order", &["Name"]);
        w.add_type_attribute(order, Attribute::new("Keyless"));
        let context = context_with_orders(&mut w, vec![]);
        let order_class = w.entity_decl(order);
        let user = w.entity("User", &["Id"]);
        let user_class = w.entity_decl(user);
        let unit = w.finish_items(vec![context, order_class, user_class]);
        assert!(diagnose(&unit, "LC011").is_empty());
    }

    #[test]
    fn test_fluent_key_counts() {
        let mut w = World::new();
        let order = w.entity("Order", &["Number"]);

        let builder = w.b.ident("modelBuilder");
        let entity = w.b.call(Some(builder), "Entity<Order>", vec![]);
        let key = w.b.ident("k");
        let has_key = w.b.call(Some(entity), "HasKey", vec![key]);
        let stmt = w.b.expr_stmt(has_key);
        let body = w.b.block(vec![stmt]);
        let configure = w.b.method("void", "OnModelCreating", vec![], body);
        let symbol = w.symbols.add_symbol(Symbol::new("OnModelCreating", SymbolKind::Method));
        w.b.bind(configure, symbol);
        if let Some(s) = w.symbols.symbol_mut(symbol) {
            s.declaration = Some(configure);
        }

        let context = context_with_orders(&mut w, vec![configure]);
        let class = w.entity_decl(order);
        let unit = w.finish_items(vec![context, class]);
        assert!(diagnose(&unit, "LC011").is_empty());
    }

    fn order_with_customer(with_key: bool) -> crate::document::Unit {
        let mut w = World::new();
        let customer = w.entity("Customer", &["Id"]);
        let order = w.entity("Order", &["Id"]);
        w.add_property(order, "Customer", customer);
        if with_key {
            let int = w.types.int;
            w.add_property(order, "CustomerId", int);
        }
        let customers = w.set_property("Customers", customer);
        let context = context_with_orders(&mut w, vec![customers]);
        let class = w.entity_decl(order);
        w.finish_items(vec![context, class])
    }

    #[test]
    fn test_navigation_without_foreign_key() {
        let unit = order_with_customer(false);
        let found = diagnose(&unit, "LC027");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Customer".to_string()]);

        let fixed = fix_first(&unit, "LC027");
        assert!(
            fixed.source().contains(
                "    public int CustomerId { get; set; }\n    public Customer Customer { get; set; }"
            ),
            "{}",
            fixed.source()
        );
        assert!(diagnose(&fixed, "LC027").is_empty());
    }

    #[test]
    fn test_declared_foreign_key_is_fine() {
        assert!(diagnose(&order_with_customer(true), "LC027").is_empty());
    }

    #[test]
    fn test_names_member_forms() {
        assert!(super::names_member("\"Customer\"", "Customer"));
        assert!(super::names_member("nameof(Customer)", "Customer"));
        assert!(!super::names_member("\"Buyer\"", "Customer"));
    }

    /// `Service` holding `AppDb _db`, set from the constructor and read in `Run`
    fn service_holding_context(w: &mut World) -> Vec<NodeId> {
        let user = w.entity("User", &["Id"]);
        let users = w.set_property("Users", user);
        let context = w.context_class("AppDb", vec![users]);
        let app_db = w.types.app_db;

        let field = w.b.field("AppDb", "_db");
        w.b.modifiers(field, &["private"]);
        let mut symbol = Symbol::new("_db", SymbolKind::Field);
        symbol.ty = Some(app_db);
        symbol.accessibility = Accessibility::Private;
        let field_symbol = w.symbols.add_symbol(symbol);
        w.b.bind(field, field_symbol);
        if let Some(s) = w.symbols.symbol_mut(field_symbol) {
            s.declaration = Some(field);
        }

        let parameter = w.param("AppDb", "db", app_db);
        let target = w.use_symbol(field_symbol);
        let value = w.local("db", app_db);
        let assign = w.b.assign(target, value);
        let stmt = w.b.expr_stmt(assign);
        let body = w.b.block(vec![stmt]);
        let constructor = w.b.method("", "Service", vec![parameter], body);
        w.b.modifiers(constructor, &["public"]);

        let reference = w.use_symbol(field_symbol);
        let set = w.member_of(reference, "Users");
        let list = w.queryable_call(set, "ToList", vec![]);
        let stmt = w.b.expr_stmt(list);
        let body = w.b.block(vec![stmt]);
        let run = w.service_method("void", "Run", vec![], body);

        let service = w.types.service;
        let class = w.declare_class(service, None, vec![field, constructor, run]);
        vec![context, class]
    }

    #[test]
    fn test_context_field_becomes_factory() {
        let mut w = World::new();
        let items = service_holding_context(&mut w);
        let unit = w.finish_items(items);

        let found = diagnose(&unit, "LC030");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].args, vec!["Service".to_string(), "_db".to_string()]);

        let fixed = fix_first(&unit, "LC030");
        let source = fixed.source();
        assert!(source.starts_with(&format!("using {};\n\n", EF_CORE)), "{}", source);
        for expected in [
            "private IDbContextFactory<AppDb> _dbFactory;",
            "public Service(IDbContextFactory<AppDb> dbFactory) {",
            "_dbFactory = dbFactory;",
            "        using var db = _dbFactory.CreateDbContext();\n        db.Users.ToList();",
        ] {
            assert!(source.contains(expected), "missing {:?} in\n{}", expected, source);
        }
        assert!(diagnose(&fixed, "LC030").is_empty());
    }

    #[test]
    fn test_controller_may_hold_context() {
        let mut w = World::new();
        let controller = w
            .symbols
            .add_type(TypeInfo::new("Controller", "Microsoft.AspNetCore.Mvc", TypeKind::Class));
        let service = w.types.service;
        if let Some(info) = w.symbols.ty_mut(service) {
            info.base = Some(controller);
        }
        let items = service_holding_context(&mut w);
        let unit = w.finish_items(items);
        assert!(diagnose(&unit, "LC030").is_empty());
    }
}
