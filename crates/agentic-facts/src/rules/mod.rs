//! Rule language: syntax tree, parser, static validation, and the registry.

pub mod ast;
pub mod parser;
pub mod registry;
pub mod validate;

pub use ast::{Atom, Decl, Literal, Program, Rule, Term, ValueType};
pub use parser::{parse_program, parse_query};
pub use registry::{RuleGroup, RuleOrigin, RuleRegistry, RuleSet, RuleSummary};
