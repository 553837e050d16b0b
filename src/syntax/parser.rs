//! Cloister Parser
//!
//! Converts module source text into a [`Module`] with byte spans on every
//! node. Import and export declarations are collected into the module header
//! while the body keeps inert markers in their place, so evaluation order and
//! source positions stay intact.

use std::rc::Rc;

use miette::NamedSource;
use pest::{error::InputLocation, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::{
    errors::SyntaxError,
    syntax::ast::{
        AssignOp, BinaryOp, DeclKind, Declarator, ExportEntry, Expr, ExprKind, ForInit,
        FunctionBody, FunctionDef, ImportBindings, ImportDecl, LogicalOp, Module, Span, Stmt,
        UnaryOp, DEFAULT_EXPORT_BINDING,
    },
};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct ModuleParser;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parse a module's source text. `location` names the module in diagnostics.
pub fn parse_module(source: &str, location: &str) -> Result<Module, SyntaxError> {
    let mut pairs = ModuleParser::parse(Rule::program, source)
        .map_err(|e| convert_parse_error(e, source, location))?;

    let mut builder = Builder {
        source,
        location,
        imports: Vec::new(),
        exports: Vec::new(),
    };

    let mut body = Vec::new();
    if let Some(program) = pairs.next() {
        for pair in program.into_inner().filter(|p| p.as_rule() != Rule::EOI) {
            body.push(builder.statement(pair, true)?);
        }
    }

    Ok(Module {
        imports: builder.imports,
        body,
        exports: builder.exports,
    })
}

// ============================================================================
// BUILDER
// ============================================================================

struct Builder<'a> {
    source: &'a str,
    location: &'a str,
    imports: Vec<ImportDecl>,
    exports: Vec<ExportEntry>,
}

type Built<T> = Result<T, SyntaxError>;

impl Builder<'_> {
    fn error(&self, message: impl Into<String>, span: Span) -> SyntaxError {
        SyntaxError {
            location: self.location.to_string(),
            message: message.into(),
            src: NamedSource::new(self.location, self.source.to_string()),
            span: span.into(),
        }
    }

    fn next_child<'i>(
        &self,
        children: &mut impl Iterator<Item = Pair<'i, Rule>>,
        what: &str,
        span: Span,
    ) -> Built<Pair<'i, Rule>> {
        children
            .next()
            .ok_or_else(|| self.error(format!("expected {what}"), span))
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn statement(&mut self, pair: Pair<Rule>, top_level: bool) -> Built<Stmt> {
        let span = get_span(&pair);
        match pair.as_rule() {
            Rule::import_decl => {
                if !top_level {
                    return Err(self.error("import declarations must appear at module top level", span));
                }
                self.import_decl(pair)?;
                Ok(Stmt::Import(span))
            }

            Rule::export_decl => {
                if !top_level {
                    return Err(self.error("export declarations must appear at module top level", span));
                }
                self.export_decl(pair)
            }

            Rule::function_decl => Ok(Stmt::Function(Rc::new(self.function(pair)?))),

            Rule::var_decl => {
                let mut children = significant(pair);
                let head = self.next_child(&mut children, "declaration", span)?;
                let (kind, decls) = self.var_head(head)?;
                Ok(Stmt::Var { kind, decls, span })
            }

            Rule::if_stmt => {
                let mut children = significant(pair);
                let test = self.expr(self.next_child(&mut children, "condition", span)?)?;
                let consequent = self.nested(self.next_child(&mut children, "statement", span)?)?;
                let alternate = children
                    .next()
                    .map(|p| self.nested(p))
                    .transpose()?
                    .map(Box::new);
                Ok(Stmt::If {
                    test,
                    consequent: Box::new(consequent),
                    alternate,
                    span,
                })
            }

            Rule::while_stmt => {
                let mut children = significant(pair);
                let test = self.expr(self.next_child(&mut children, "condition", span)?)?;
                let body = self.nested(self.next_child(&mut children, "loop body", span)?)?;
                Ok(Stmt::While {
                    test,
                    body: Box::new(body),
                    span,
                })
            }

            Rule::for_stmt => self.for_stmt(pair),

            Rule::try_stmt => {
                let mut block = None;
                let mut param = None;
                let mut handler = None;
                let mut finalizer = None;
                for child in significant(pair) {
                    match child.as_rule() {
                        Rule::block => block = Some(self.block(child)?),
                        Rule::catch_clause => {
                            for part in significant(child) {
                                match part.as_rule() {
                                    Rule::ident => param = Some(part.as_str().to_string()),
                                    _ => handler = Some(self.block(part)?),
                                }
                            }
                        }
                        Rule::finally_clause => {
                            let mut parts = significant(child);
                            let body = self.next_child(&mut parts, "finally block", span)?;
                            finalizer = Some(self.block(body)?);
                        }
                        _ => {}
                    }
                }
                if handler.is_none() && finalizer.is_none() {
                    return Err(self.error("try requires a catch or finally clause", span));
                }
                Ok(Stmt::Try {
                    block: block.unwrap_or_default(),
                    param,
                    handler,
                    finalizer,
                    span,
                })
            }

            Rule::return_stmt => {
                let value = significant(pair).next().map(|p| self.expr(p)).transpose()?;
                Ok(Stmt::Return(value, span))
            }

            Rule::throw_stmt => {
                let mut children = significant(pair);
                let value = self.expr(self.next_child(&mut children, "thrown value", span)?)?;
                Ok(Stmt::Throw(value, span))
            }

            Rule::block => Ok(Stmt::Block(self.block(pair)?, span)),

            Rule::empty_stmt => Ok(Stmt::Empty(span)),

            Rule::expr_stmt => {
                let mut children = significant(pair);
                let value = self.expr(self.next_child(&mut children, "expression", span)?)?;
                Ok(Stmt::Expr(value, span))
            }

            rule => Err(self.error(format!("unsupported statement: {rule:?}"), span)),
        }
    }

    fn nested(&mut self, pair: Pair<Rule>) -> Built<Stmt> {
        self.statement(pair, false)
    }

    fn block(&mut self, pair: Pair<Rule>) -> Built<Vec<Stmt>> {
        pair.into_inner().map(|p| self.nested(p)).collect()
    }

    fn for_stmt(&mut self, pair: Pair<Rule>) -> Built<Stmt> {
        let span = get_span(&pair);
        let mut init = None;
        let mut test = None;
        let mut update = None;
        let mut body = None;

        for child in significant(pair) {
            match child.as_rule() {
                Rule::for_init => {
                    if let Some(inner) = child.into_inner().next() {
                        init = Some(if inner.as_rule() == Rule::var_head {
                            let (kind, decls) = self.var_head(inner)?;
                            ForInit::Var { kind, decls }
                        } else {
                            ForInit::Expr(self.expr(inner)?)
                        });
                    }
                }
                Rule::for_test => {
                    test = child.into_inner().next().map(|p| self.expr(p)).transpose()?;
                }
                Rule::for_update => {
                    update = child.into_inner().next().map(|p| self.expr(p)).transpose()?;
                }
                _ => body = Some(self.nested(child)?),
            }
        }

        let body = body.ok_or_else(|| self.error("expected loop body", span))?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body: Box::new(body),
            span,
        })
    }

    fn var_head(&self, pair: Pair<Rule>) -> Built<(DeclKind, Vec<Declarator>)> {
        let span = get_span(&pair);
        let mut children = pair.into_inner();
        let kind = match self.next_child(&mut children, "declaration kind", span)?.as_str() {
            "const" => DeclKind::Const,
            "let" => DeclKind::Let,
            _ => DeclKind::Var,
        };

        let mut decls = Vec::new();
        for declarator in children {
            let decl_span = get_span(&declarator);
            let mut parts = declarator.into_inner();
            let name = self.next_child(&mut parts, "binding name", decl_span)?;
            let init = parts.next().map(|p| self.expr(p)).transpose()?;
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error("missing initializer in const declaration", decl_span));
            }
            decls.push(Declarator {
                name: name.as_str().to_string(),
                init,
            });
        }
        Ok((kind, decls))
    }

    fn function(&self, pair: Pair<Rule>) -> Built<FunctionDef> {
        let span = get_span(&pair);
        let mut name = None;
        let mut params = Vec::new();
        let mut body = None;

        for child in significant(pair) {
            match child.as_rule() {
                Rule::ident => name = Some(child.as_str().to_string()),
                Rule::params => params = child.into_inner().map(|p| p.as_str().to_string()).collect(),
                Rule::block => body = Some(self.function_block(child)?),
                _ => {}
            }
        }

        let body = body.ok_or_else(|| self.error("expected function body", span))?;
        Ok(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
            span,
        })
    }

    /// Function bodies get their own builder state: imports and exports
    /// inside them are rejected by the `top_level` flag.
    fn function_block(&self, pair: Pair<Rule>) -> Built<Vec<Stmt>> {
        let mut inner = Builder {
            source: self.source,
            location: self.location,
            imports: Vec::new(),
            exports: Vec::new(),
        };
        inner.block(pair)
    }

    // ------------------------------------------------------------------------
    // Module declarations
    // ------------------------------------------------------------------------

    fn import_decl(&mut self, pair: Pair<Rule>) -> Built<()> {
        let span = get_span(&pair);
        let mut bindings = ImportBindings::SideEffect;
        let mut specifier = None;

        for child in significant(pair) {
            match child.as_rule() {
                Rule::namespace_import => {
                    let mut parts = significant(child);
                    let local = self.next_child(&mut parts, "namespace binding", span)?;
                    bindings = ImportBindings::Namespace(local.as_str().to_string());
                }
                Rule::named_imports => {
                    let mut named = Vec::new();
                    for spec in child.into_inner() {
                        let mut parts = significant(spec);
                        let imported = self.next_child(&mut parts, "imported name", span)?.as_str().to_string();
                        let local = parts.next().map(|p| p.as_str().to_string()).unwrap_or_else(|| imported.clone());
                        named.push((imported, local));
                    }
                    bindings = ImportBindings::Named(named);
                }
                Rule::string => specifier = Some(self.string(child)?),
                _ => {}
            }
        }

        let specifier = specifier.ok_or_else(|| self.error("expected module specifier", span))?;
        self.imports.push(ImportDecl {
            specifier,
            bindings,
            span,
        });
        Ok(())
    }

    fn export_decl(&mut self, pair: Pair<Rule>) -> Built<Stmt> {
        let span = get_span(&pair);
        let mut children = significant(pair);
        let decl = self.next_child(&mut children, "exported declaration", span)?;

        match decl.as_rule() {
            Rule::export_default => {
                let mut parts = significant(decl);
                let value = self.expr(self.next_child(&mut parts, "default export", span)?)?;
                self.export("default", DEFAULT_EXPORT_BINDING);
                Ok(Stmt::ExportDefault(value, span))
            }
            Rule::function_decl => {
                let def = self.function(decl)?;
                if let Some(name) = def.name.clone() {
                    self.export(&name, &name);
                }
                Ok(Stmt::Function(Rc::new(def)))
            }
            Rule::var_decl => {
                let stmt = self.statement(decl, true)?;
                if let Stmt::Var { decls, .. } = &stmt {
                    let names: Vec<String> = decls.iter().map(|d| d.name.clone()).collect();
                    for name in names {
                        self.export(&name, &name);
                    }
                }
                Ok(stmt)
            }
            Rule::export_list => {
                for spec in decl.into_inner() {
                    let mut parts = significant(spec);
                    let local = self.next_child(&mut parts, "exported binding", span)?.as_str().to_string();
                    let exported = parts.next().map(|p| p.as_str().to_string()).unwrap_or_else(|| local.clone());
                    self.export(&exported, &local);
                }
                Ok(Stmt::Empty(span))
            }
            rule => Err(self.error(format!("unsupported export: {rule:?}"), span)),
        }
    }

    fn export(&mut self, exported: &str, local: &str) {
        self.exports.retain(|e| e.exported != exported);
        self.exports.push(ExportEntry {
            exported: exported.to_string(),
            local: local.to_string(),
        });
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn expr(&self, pair: Pair<Rule>) -> Built<Expr> {
        let span = get_span(&pair);
        match pair.as_rule() {
            Rule::arrow_fn => {
                let mut children = pair.into_inner();
                let head = self.next_child(&mut children, "parameters", span)?;
                let params = match head.into_inner().next() {
                    Some(p) if p.as_rule() == Rule::ident => vec![p.as_str().to_string()],
                    Some(p) => p.into_inner().map(|i| i.as_str().to_string()).collect(),
                    None => Vec::new(),
                };
                let body_pair = self.next_child(&mut children, "arrow body", span)?;
                let body = if body_pair.as_rule() == Rule::block {
                    FunctionBody::Block(self.function_block(body_pair)?)
                } else {
                    FunctionBody::Expr(Box::new(self.expr(body_pair)?))
                };
                let def = FunctionDef {
                    name: None,
                    params,
                    body,
                    span,
                };
                Ok(Expr::new(ExprKind::Function(Rc::new(def)), span))
            }

            Rule::assign => {
                let mut children = pair.into_inner();
                let target = self.postfix(self.next_child(&mut children, "assignment target", span)?)?;
                let op = match self.next_child(&mut children, "assignment operator", span)?.as_str() {
                    "+=" => AssignOp::AddAssign,
                    "-=" => AssignOp::SubAssign,
                    _ => AssignOp::Assign,
                };
                let value = self.expr(self.next_child(&mut children, "assigned value", span)?)?;
                Ok(Expr::new(
                    ExprKind::Assign(op, Box::new(target), Box::new(value)),
                    span,
                ))
            }

            Rule::conditional => {
                let mut children = pair.into_inner();
                let test = self.expr(self.next_child(&mut children, "expression", span)?)?;
                match (children.next(), children.next()) {
                    (Some(then), Some(otherwise)) => Ok(Expr::new(
                        ExprKind::Conditional(
                            Box::new(test),
                            Box::new(self.expr(then)?),
                            Box::new(self.expr(otherwise)?),
                        ),
                        span,
                    )),
                    _ => Ok(test),
                }
            }

            Rule::coalesce
            | Rule::logic_or
            | Rule::logic_and
            | Rule::equality
            | Rule::comparison
            | Rule::additive
            | Rule::multiplicative => self.fold_binary(pair),

            Rule::unary => {
                let mut ops = Vec::new();
                let mut operand = None;
                for child in pair.into_inner() {
                    if child.as_rule() == Rule::unary_op {
                        ops.push((child.as_str().to_string(), get_span(&child)));
                    } else {
                        operand = Some(self.postfix(child)?);
                    }
                }
                let mut value = operand.ok_or_else(|| self.error("expected operand", span))?;
                for (op, op_span) in ops.into_iter().rev() {
                    let op = match op.as_str() {
                        "!" => UnaryOp::Not,
                        "-" => UnaryOp::Neg,
                        _ => UnaryOp::TypeOf,
                    };
                    let whole = Span::new(op_span.start, value.span.end);
                    value = Expr::new(ExprKind::Unary(op, Box::new(value)), whole);
                }
                Ok(value)
            }

            Rule::postfix | Rule::assign_target => self.postfix(pair),

            _ => self.primary(pair),
        }
    }

    fn fold_binary(&self, pair: Pair<Rule>) -> Built<Expr> {
        let span = get_span(&pair);
        let mut children = pair.into_inner();
        let mut left = self.expr(self.next_child(&mut children, "operand", span)?)?;

        while let Some(op) = children.next() {
            let right = self.expr(self.next_child(&mut children, "right operand", span)?)?;
            let whole = Span::new(left.span.start, right.span.end);
            let (left_box, right_box) = (Box::new(left), Box::new(right));
            let kind = match op.as_str() {
                "??" => ExprKind::Logical(LogicalOp::Coalesce, left_box, right_box),
                "||" => ExprKind::Logical(LogicalOp::Or, left_box, right_box),
                "&&" => ExprKind::Logical(LogicalOp::And, left_box, right_box),
                text => {
                    let op = binary_op(text)
                        .ok_or_else(|| self.error(format!("unknown operator `{text}`"), get_span(&op)))?;
                    ExprKind::Binary(op, left_box, right_box)
                }
            };
            left = Expr::new(kind, whole);
        }
        Ok(left)
    }

    fn postfix(&self, pair: Pair<Rule>) -> Built<Expr> {
        let span = get_span(&pair);
        if !matches!(pair.as_rule(), Rule::postfix | Rule::assign_target) {
            return self.expr(pair);
        }

        let mut children = pair.into_inner();
        let mut value = self.primary(self.next_child(&mut children, "expression", span)?)?;
        for suffix in children {
            value = self.apply_suffix(value, suffix)?;
        }
        Ok(value)
    }

    fn apply_suffix(&self, target: Expr, suffix: Pair<Rule>) -> Built<Expr> {
        let whole = Span::new(target.span.start, suffix.as_span().end());
        let kind = match suffix.as_rule() {
            Rule::member => {
                let name = suffix.into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default();
                ExprKind::Member(Box::new(target), name)
            }
            Rule::index => {
                let span = get_span(&suffix);
                let mut parts = suffix.into_inner();
                let key = self.expr(self.next_child(&mut parts, "index expression", span)?)?;
                ExprKind::Index(Box::new(target), Box::new(key))
            }
            Rule::call_args => ExprKind::Call(Box::new(target), self.arguments(suffix)?),
            rule => return Err(self.error(format!("unsupported suffix: {rule:?}"), whole)),
        };
        Ok(Expr::new(kind, whole))
    }

    fn arguments(&self, pair: Pair<Rule>) -> Built<Vec<Expr>> {
        pair.into_inner().map(|p| self.expr(p)).collect()
    }

    fn primary(&self, pair: Pair<Rule>) -> Built<Expr> {
        let span = get_span(&pair);
        let kind = match pair.as_rule() {
            Rule::number => {
                let text = pair.as_str();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| self.error(format!("invalid number literal `{text}`"), span))?;
                ExprKind::Number(value)
            }
            Rule::string => ExprKind::String(self.string(pair)?),
            Rule::literal => match pair.as_str() {
                "true" => ExprKind::Bool(true),
                "false" => ExprKind::Bool(false),
                "null" => ExprKind::Null,
                _ => ExprKind::Undefined,
            },
            Rule::ident => ExprKind::Ident(pair.as_str().to_string()),
            Rule::array_lit => ExprKind::Array(self.arguments(pair)?),
            Rule::object_lit => {
                let mut properties = Vec::new();
                for property in pair.into_inner() {
                    let prop_span = get_span(&property);
                    let mut parts = property.into_inner();
                    let key = self.next_child(&mut parts, "property name", prop_span)?;
                    let name = if key.as_rule() == Rule::string {
                        self.string(key.clone())?
                    } else {
                        key.as_str().to_string()
                    };
                    let value = match parts.next() {
                        Some(value) => self.expr(value)?,
                        None => Expr::new(ExprKind::Ident(name.clone()), get_span(&key)),
                    };
                    properties.push((name, value));
                }
                ExprKind::Object(properties)
            }
            Rule::new_expr => {
                let mut children = significant(pair);
                let head = self.next_child(&mut children, "constructor", span)?;
                let mut callee = Expr::new(ExprKind::Ident(head.as_str().to_string()), get_span(&head));
                let mut args = Vec::new();
                for child in children {
                    if child.as_rule() == Rule::call_args {
                        args = self.arguments(child)?;
                    } else {
                        callee = self.apply_suffix(callee, child)?;
                    }
                }
                ExprKind::New(Box::new(callee), args)
            }
            Rule::function_expr => ExprKind::Function(Rc::new(self.function(pair)?)),
            Rule::paren => {
                let mut children = pair.into_inner();
                return self.expr(self.next_child(&mut children, "expression", span)?);
            }
            Rule::postfix | Rule::unary | Rule::conditional | Rule::arrow_fn | Rule::assign => {
                return self.expr(pair)
            }
            rule => return Err(self.error(format!("unsupported expression: {rule:?}"), span)),
        };
        Ok(Expr::new(kind, span))
    }

    fn string(&self, pair: Pair<Rule>) -> Built<String> {
        let span = get_span(&pair);
        let body = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
        unescape(body).ok_or_else(|| self.error("invalid escape sequence in string literal", span))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn get_span(pair: &Pair<Rule>) -> Span {
    let span = pair.as_span();
    Span::new(span.start(), span.end())
}

/// Children of `pair` with keyword tokens removed.
fn significant<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_import
            | Rule::kw_export
            | Rule::kw_from
            | Rule::kw_as
            | Rule::kw_default
            | Rule::kw_function
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_try
            | Rule::kw_catch
            | Rule::kw_finally
            | Rule::kw_return
            | Rule::kw_throw
            | Rule::kw_new
            | Rule::kw_typeof
    )
}

fn binary_op(text: &str) -> Option<BinaryOp> {
    Some(match text {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNe,
        "==" => BinaryOp::LooseEq,
        "!=" => BinaryOp::LooseNe,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        _ => return None,
    })
}

fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            '0' => out.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            other => out.push(other),
        }
    }
    Some(out)
}

fn convert_parse_error(err: pest::error::Error<Rule>, source: &str, location: &str) -> SyntaxError {
    let (start, end) = match err.location {
        InputLocation::Pos(pos) => (pos, pos),
        InputLocation::Span((start, end)) => (start, end),
    };
    SyntaxError {
        location: location.to_string(),
        message: err.variant.message().to_string(),
        src: NamedSource::new(location, source.to_string()),
        span: Span::new(start, end).into(),
    }
}
