//! Syntax layer for the Cloister module language: AST types and the pest-based parser.

pub mod ast;
pub mod parser;

pub use ast::{Module, Span};
pub use parser::parse_module;
