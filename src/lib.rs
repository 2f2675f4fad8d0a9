//! Contraband - static analysis for LINQ and EF Core query code
//!
//! Rules run over an analyzed unit: a syntax tree produced by an external
//! front end together with its resolved symbol table. Each rule is a pure
//! function of a node, the symbol table, and the chain and containment
//! walkers. Rules that can repair what they find offer a structural
//! rewrite, applied by the rewrite engine.
//!
//! # Architecture
//!
//! ```text
//! CLI -> Engine -> Registry -> Rule -> Unit (Tree + SymbolTable)
//!                                  \-> Rewrite -> Fixer
//! ```
//!
//! The engine loads configuration, selects rules, dispatches them over each
//! unit in a single pre-order walk, and collects diagnostics. The fixer
//! applies non-conflicting rewrites in passes until the unit is clean.

pub mod config;
pub mod diagnostic;
pub mod document;
pub mod ef;
pub mod engine;
pub mod fixer;
pub mod output;
pub mod registry;
pub mod rewrite;
pub mod rule;
pub mod symbols;
pub mod tree;
pub mod walker;

mod rules;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use diagnostic::{Diagnostic, FixHint, FixSafety, Location, Severity};
pub use document::{ParseError, Unit, UnitFormat};
pub use engine::{Engine, LintResult, RuleTiming};
pub use fixer::{batch_fix, FixMode, FixResult, Fixer, UnitFix};
pub use output::OutputFormatter;
pub use registry::Registry;
pub use rewrite::{Edit, Rewrite, RewriteError, SymbolEdit, Template};
pub use rule::{Rule, RuleCategory, RuleContext, RuleMeta, RuleStability};
pub use symbols::{SymbolId, SymbolTable, TypeId};
pub use tree::{Node, NodeId, NodeKind, Tree, TreeBuilder};
