//! rowcache Query - Predicate Compiler and Relation Loads
//!
//! Predicates are written against entity fields with the builder in
//! [`expr`], compiled to a parameterised WHERE fragment by [`compiler`], and
//! for two-entity predicates evaluated row-by-row against a related
//! collection by [`relation`].

pub mod compiler;
pub mod expr;
pub mod relation;

pub use compiler::{compile, compile_relation, PredicateCompiler, WherePart};
pub use expr::{bind, col, conditional, field, list, lit, BinaryOp, Expr, FieldRef, Method, UnaryOp};
pub use relation::{fetch_all, load_related, RelationTemplate};
