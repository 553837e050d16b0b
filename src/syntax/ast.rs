//! Abstract syntax tree for the Cloister module language.
//!
//! Every node carries a byte [`Span`] into the original source text so the
//! runtime can attribute call-stack frames to `file:line:col` positions.

use std::rc::Rc;

/// Byte range into a module's source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end.saturating_sub(span.start)).into()
    }
}

// ============================================================================
// MODULE
// ============================================================================

/// A parsed module: its import declarations, its body, and the names it exports.
#[derive(Debug, Clone)]
pub struct Module {
    pub imports: Vec<ImportDecl>,
    pub body: Vec<Stmt>,
    pub exports: Vec<ExportEntry>,
}

impl Module {
    /// Import specifiers in source order, duplicates removed.
    pub fn specifiers(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for import in &self.imports {
            if !seen.contains(&import.specifier) {
                seen.push(import.specifier.clone());
            }
        }
        seen
    }

    /// Exported names in declaration order.
    pub fn export_names(&self) -> Vec<String> {
        self.exports.iter().map(|e| e.exported.clone()).collect()
    }
}

/// Maps an exported name to the module-scope binding that holds its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub exported: String,
    pub local: String,
}

/// Binding name used for `export default <expr>`.
pub const DEFAULT_EXPORT_BINDING: &str = "*default*";

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub specifier: String,
    pub bindings: ImportBindings,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportBindings {
    /// `import "x";`
    SideEffect,
    /// `import * as ns from "x";`
    Namespace(String),
    /// `import { a, b as c } from "x";` as `(imported, local)` pairs.
    Named(Vec<(String, String)>),
}

// ============================================================================
// STATEMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// Imports are linked before the body runs; the statement itself is inert.
    Import(Span),
    Function(Rc<FunctionDef>),
    Var {
        kind: DeclKind,
        decls: Vec<Declarator>,
        span: Span,
    },
    ExportDefault(Expr, Span),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
        span: Span,
    },
    Return(Option<Expr>, Span),
    Throw(Expr, Span),
    Block(Vec<Stmt>, Span),
    Empty(Span),
    Expr(Expr, Span),
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Var { kind: DeclKind, decls: Vec<Declarator> },
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Import(span)
            | Stmt::Var { span, .. }
            | Stmt::ExportDefault(_, span)
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Return(_, span)
            | Stmt::Throw(_, span)
            | Stmt::Block(_, span)
            | Stmt::Empty(span)
            | Stmt::Expr(_, span) => *span,
            Stmt::Function(def) => def.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}
