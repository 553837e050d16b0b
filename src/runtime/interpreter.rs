//! The tree-walking evaluator.
//!
//! ## Frames and positions
//!
//! Every module body, `eval` script and closure invocation pushes a [`Frame`].
//! Before each statement, call and `new` the top frame's offset is moved to
//! the construct being executed, so an error object created at that point
//! captures accurate `location:line:col` positions for its `stack`.
//!
//! ## Strictness
//!
//! Modules are strict: assigning to an undeclared name is a `ReferenceError`,
//! writing to a frozen or non-extensible object is a `TypeError`.

use std::{collections::HashMap, rc::Rc};

use tracing::trace;

use crate::{
    lockdown,
    runtime::{
        intrinsics,
        output::{OutputSink, StdoutSink, Stream},
        scope::{AssignError, Scope},
        stack::{format_stack, Frame, SourceMaps, MAX_CALL_DEPTH},
        value::{format_number, Callable, ObjectClass, ObjectRef, Value, WriteRefusal},
        Closure, EvalResult, ModuleSource, Realm, Thrown,
    },
    syntax::{
        ast::{
            AssignOp, BinaryOp, DeclKind, Declarator, Expr, ExprKind, ForInit, FunctionBody,
            FunctionDef, LogicalOp, Module, Stmt, UnaryOp, DEFAULT_EXPORT_BINDING,
        },
        parse_module,
    },
    wrapper::sourcemap::SourceMap,
};

enum Completion {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    frames: Vec<Frame>,
    output: Box<dyn OutputSink>,
    source_maps: SourceMaps,
    builtins: HashMap<String, ObjectRef>,
    host_global: ObjectRef,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_output(Box::new(StdoutSink))
    }

    pub fn with_output(output: Box<dyn OutputSink>) -> Self {
        Self {
            frames: Vec::new(),
            output,
            source_maps: SourceMaps::new(),
            builtins: HashMap::new(),
            host_global: intrinsics::host_global(),
        }
    }

    // ------------------------------------------------------------------------
    // Host facilities
    // ------------------------------------------------------------------------

    /// The mutable global object shared by every module loaded in the host realm.
    pub fn host_global(&self) -> &ObjectRef {
        &self.host_global
    }

    pub fn register_builtin(&mut self, specifier: impl Into<String>, namespace: ObjectRef) {
        self.builtins.insert(specifier.into(), namespace);
    }

    pub fn builtin(&self, specifier: &str) -> Option<ObjectRef> {
        self.builtins.get(specifier).cloned()
    }

    pub fn builtins(&self) -> &HashMap<String, ObjectRef> {
        &self.builtins
    }

    /// Translate future stack frames in `location` through `map`.
    pub fn register_source_map(&mut self, location: impl Into<String>, map: SourceMap) {
        self.source_maps.insert(location.into(), Rc::new(map));
    }

    pub fn emit(&mut self, stream: Stream, text: &str) {
        self.output.emit(stream, text);
    }

    /// Realm of the innermost script frame; host when nothing is running.
    pub fn current_realm(&self) -> Realm {
        self.frames.last().map_or(Realm::Host, |f| f.realm)
    }

    /// Location of the module or script whose code is running.
    pub fn current_location(&self) -> Option<String> {
        self.frames.last().map(|f| f.source.location.clone())
    }

    pub fn current_global(&self) -> ObjectRef {
        self.frames
            .last()
            .map_or_else(|| self.host_global.clone(), |f| f.global.clone())
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Evaluate a parsed module whose imports have already been linked into
    /// `bindings`, returning its frozen namespace.
    pub fn evaluate_module(
        &mut self,
        module: &Module,
        source: Rc<ModuleSource>,
        bindings: Vec<(String, Value)>,
        global: ObjectRef,
        realm: Realm,
    ) -> EvalResult<ObjectRef> {
        trace!(location = %source.location, ?realm, "evaluating module");
        let scope = Scope::root(global.clone());
        for (name, value) in bindings {
            scope.declare(&name, value, false);
        }

        self.push_frame(Frame {
            function: Rc::from(""),
            source,
            offset: 0,
            realm,
            global,
        })?;
        let result = self.run_module_body(module, &scope);
        self.frames.pop();
        result
    }

    fn run_module_body(&mut self, module: &Module, scope: &Scope) -> EvalResult<ObjectRef> {
        self.exec_block_in(&module.body, scope)?;

        let mut entries = Vec::with_capacity(module.exports.len());
        for export in &module.exports {
            let value = scope.lookup(&export.local).map_or_else(
                || self.throw_error("ReferenceError", &format!("{} is not defined", export.local)),
                Ok,
            )?;
            entries.push((export.exported.clone(), value));
        }
        Ok(crate::runtime::module::make_namespace(entries))
    }

    /// Evaluate script text (no imports or exports) against `global`,
    /// returning the value of its final expression statement.
    pub fn evaluate_script(
        &mut self,
        text: &str,
        location: &str,
        global: ObjectRef,
        realm: Realm,
    ) -> EvalResult<Value> {
        let module = match parse_module(text, location) {
            Ok(module) => module,
            Err(err) => return self.throw_error("SyntaxError", &err.message),
        };
        if !module.imports.is_empty() || !module.exports.is_empty() {
            return self.throw_error("SyntaxError", "Cannot use import or export outside a module");
        }

        let scope = Scope::root(global.clone());
        self.push_frame(Frame {
            function: Rc::from("eval"),
            source: Rc::new(ModuleSource::new(location, text)),
            offset: 0,
            realm,
            global,
        })?;
        let result = self.run_script_body(&module.body, &scope);
        self.frames.pop();
        result
    }

    fn run_script_body(&mut self, body: &[Stmt], scope: &Scope) -> EvalResult<Value> {
        self.hoist(body, scope);
        let mut last = Value::Undefined;
        for stmt in body {
            if let Stmt::Expr(expr, span) = stmt {
                self.mark(span.start);
                last = self.eval(expr, scope)?;
                continue;
            }
            if let Completion::Return(value) = self.exec(stmt, scope)? {
                return Ok(value);
            }
        }
        Ok(last)
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    pub fn call(&mut self, callee: &Value, args: &[Value]) -> EvalResult<Value> {
        self.invoke(callee, args, "value")
    }

    fn invoke(&mut self, callee: &Value, args: &[Value], what: &str) -> EvalResult<Value> {
        let Some(callable) = callee.as_object().and_then(ObjectRef::callable) else {
            return self.throw_error("TypeError", &format!("{what} is not a function"));
        };
        match callable {
            Callable::Native { func, .. } => func(self, args),
            Callable::Closure(closure) => self.call_closure(&closure, args),
        }
    }

    /// `new callee(...args)`. Only native constructors can be instantiated.
    pub fn construct(&mut self, callee: &Value, args: &[Value], what: &str) -> EvalResult<Value> {
        match callee.as_object().and_then(ObjectRef::callable) {
            Some(Callable::Native {
                func,
                constructor: true,
                ..
            }) => func(self, args),
            _ => self.throw_error("TypeError", &format!("{what} is not a constructor")),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: &[Value]) -> EvalResult<Value> {
        self.push_frame(Frame {
            function: closure.name.clone(),
            source: closure.source.clone(),
            offset: closure.def.span.start,
            realm: closure.realm,
            global: closure.scope.global().clone(),
        })?;

        let scope = closure.scope.child();
        for (index, param) in closure.def.params.iter().enumerate() {
            scope.declare(param, args.get(index).cloned().unwrap_or_default(), true);
        }

        let result = match &closure.def.body {
            FunctionBody::Block(body) => self.exec_block_in(body, &scope).map(|c| match c {
                Completion::Return(value) => value,
                Completion::Normal => Value::Undefined,
            }),
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
        };
        self.frames.pop();
        result
    }

    fn push_frame(&mut self, frame: Frame) -> EvalResult<()> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return self.throw_error("RangeError", "Maximum call stack size exceeded");
        }
        self.frames.push(frame);
        Ok(())
    }

    fn mark(&mut self, offset: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.offset = offset;
        }
    }

    fn make_closure(&self, def: &Rc<FunctionDef>, scope: &Scope, name_hint: Option<&str>) -> Value {
        let (source, realm) = match self.frames.last() {
            Some(frame) => (frame.source.clone(), frame.realm),
            None => (Rc::new(ModuleSource::new("<anonymous>", "")), Realm::Host),
        };
        let name = def.name.as_deref().or(name_hint).unwrap_or("");
        let closure = Closure {
            name: Rc::from(name),
            def: def.clone(),
            scope: scope.clone(),
            source,
            realm,
        };
        Value::Object(ObjectRef::new(ObjectClass::Function(Callable::Closure(Rc::new(closure)))))
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    /// Create an error object whose `stack` is captured from the current frames.
    pub fn make_error(&self, name: &str, message: &str) -> ObjectRef {
        let header = if message.is_empty() {
            name.to_string()
        } else {
            format!("{name}: {message}")
        };
        let stack = if lockdown::hides_stack_frames() {
            header
        } else {
            format_stack(&header, &self.frames, &self.source_maps)
        };

        let error = ObjectRef::new(ObjectClass::Error);
        {
            let mut inner = error.borrow_mut();
            let _ = inner.set("name", Value::string(name));
            let _ = inner.set("message", Value::string(message));
            let _ = inner.set("stack", Value::from(stack));
        }
        error
    }

    pub fn throw_error<T>(&self, name: &str, message: &str) -> EvalResult<T> {
        Err(Thrown(Value::Object(self.make_error(name, message))))
    }

    fn refusal_error<T>(&self, refusal: WriteRefusal, key: &str) -> EvalResult<T> {
        match refusal {
            WriteRefusal::Frozen => self.throw_error(
                "TypeError",
                &format!("Cannot assign to read only property '{key}' of object"),
            ),
            WriteRefusal::NotExtensible => self.throw_error(
                "TypeError",
                &format!("Cannot add property {key}, object is not extensible"),
            ),
        }
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    pub fn get_property(&mut self, target: &Value, key: &str) -> EvalResult<Value> {
        match target {
            Value::Undefined | Value::Null => self.throw_error(
                "TypeError",
                &format!("Cannot read properties of {} (reading '{key}')", target.to_display()),
            ),
            Value::String(s) => Ok(intrinsics::string_property(s, key).unwrap_or_default()),
            Value::Object(obj) => {
                if let Some(value) = obj.get(key) {
                    return Ok(value);
                }
                Ok(intrinsics::array_method(obj, key)
                    .map(Value::Object)
                    .unwrap_or_default())
            }
            Value::Number(_) | Value::Bool(_) => Ok(Value::Undefined),
        }
    }

    pub fn set_property(&mut self, target: &Value, key: &str, value: Value) -> EvalResult<()> {
        let Value::Object(obj) = target else {
            return self.throw_error(
                "TypeError",
                &format!("Cannot create property '{key}' on {}", target.type_of()),
            );
        };
        match obj.set(key, value) {
            Ok(()) => Ok(()),
            Err(refusal) => self.refusal_error(refusal, key),
        }
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn hoist(&self, stmts: &[Stmt], scope: &Scope) {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    scope.declare(name, self.make_closure(def, scope, None), true);
                }
            }
        }
    }

    /// Run statements directly in `scope` (function bodies, module bodies).
    fn exec_block_in(&mut self, stmts: &[Stmt], scope: &Scope) -> EvalResult<Completion> {
        self.hoist(stmts, scope);
        for stmt in stmts {
            if let Completion::Return(value) = self.exec(stmt, scope)? {
                return Ok(Completion::Return(value));
            }
        }
        Ok(Completion::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Scope) -> EvalResult<Completion> {
        self.mark(stmt.span().start);
        match stmt {
            Stmt::Import(_) | Stmt::Function(_) | Stmt::Empty(_) => Ok(Completion::Normal),

            Stmt::Var { kind, decls, .. } => {
                self.declare_all(*kind, decls, scope)?;
                Ok(Completion::Normal)
            }

            Stmt::ExportDefault(expr, _) => {
                let value = self.eval_named(expr, scope, "default")?;
                scope.declare(DEFAULT_EXPORT_BINDING, value, false);
                Ok(Completion::Normal)
            }

            Stmt::If {
                test,
                consequent,
                alternate,
                ..
            } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }

            Stmt::While { test, body, .. } => {
                while self.eval(test, scope)?.is_truthy() {
                    if let Completion::Return(value) = self.exec(body, scope)? {
                        return Ok(Completion::Return(value));
                    }
                }
                Ok(Completion::Normal)
            }

            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                let loop_scope = scope.child();
                match init {
                    Some(ForInit::Var { kind, decls }) => self.declare_all(*kind, decls, &loop_scope)?,
                    Some(ForInit::Expr(expr)) => {
                        self.eval(expr, &loop_scope)?;
                    }
                    None => {}
                }
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &loop_scope)?.is_truthy() {
                            break;
                        }
                    }
                    if let Completion::Return(value) = self.exec(body, &loop_scope)? {
                        return Ok(Completion::Return(value));
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
                Ok(Completion::Normal)
            }

            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
                ..
            } => {
                let result = match (self.exec_block_in(block, &scope.child()), handler) {
                    (Err(Thrown(thrown)), Some(handler)) => {
                        let catch_scope = scope.child();
                        if let Some(param) = param {
                            catch_scope.declare(param, thrown, true);
                        }
                        self.exec_block_in(handler, &catch_scope)
                    }
                    (result, _) => result,
                };
                if let Some(finalizer) = finalizer {
                    if let Completion::Return(value) = self.exec_block_in(finalizer, &scope.child())? {
                        return Ok(Completion::Return(value));
                    }
                }
                result
            }

            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }

            Stmt::Throw(expr, _) => Err(Thrown(self.eval(expr, scope)?)),

            Stmt::Block(stmts, _) => self.exec_block_in(stmts, &scope.child()),

            Stmt::Expr(expr, _) => {
                self.eval(expr, scope)?;
                Ok(Completion::Normal)
            }
        }
    }

    fn declare_all(&mut self, kind: DeclKind, decls: &[Declarator], scope: &Scope) -> EvalResult<()> {
        for decl in decls {
            let value = match &decl.init {
                Some(init) => self.eval_named(init, scope, &decl.name)?,
                None => Value::Undefined,
            };
            let fresh = scope.declare(&decl.name, value, kind != DeclKind::Const);
            if !fresh && kind != DeclKind::Var {
                return self.throw_error(
                    "SyntaxError",
                    &format!("Identifier '{}' has already been declared", decl.name),
                );
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    /// Evaluate `expr`, naming it `name` if it is an anonymous function.
    fn eval_named(&mut self, expr: &Expr, scope: &Scope, name: &str) -> EvalResult<Value> {
        if let ExprKind::Function(def) = &expr.kind {
            return Ok(self.make_closure(def, scope, Some(name)));
        }
        self.eval(expr, scope)
    }

    fn eval(&mut self, expr: &Expr, scope: &Scope) -> EvalResult<Value> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::String(s) => Ok(Value::string(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),

            ExprKind::Ident(name) => match scope.lookup(name) {
                Some(value) => Ok(value),
                None => self.throw_error("ReferenceError", &format!("{name} is not defined")),
            },

            ExprKind::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::Object(ObjectRef::array(values)))
            }

            ExprKind::Object(properties) => {
                let obj = ObjectRef::ordinary();
                for (key, value) in properties {
                    let value = self.eval_named(value, scope, key)?;
                    self.set_property(&Value::Object(obj.clone()), key, value)?;
                }
                Ok(Value::Object(obj))
            }

            ExprKind::Function(def) => Ok(self.make_closure(def, scope, None)),

            ExprKind::Member(target, key) => {
                let target = self.eval(target, scope)?;
                self.get_property(&target, key)
            }

            ExprKind::Index(target, key) => {
                let target = self.eval(target, scope)?;
                let key = property_key(&self.eval(key, scope)?);
                self.get_property(&target, &key)
            }

            ExprKind::Call(callee, args) => {
                let function = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                self.mark(expr.span.start);
                self.invoke(&function, &args, &describe(callee))
            }

            ExprKind::New(callee, args) => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_args(args, scope)?;
                self.mark(expr.span.start);
                self.construct(&constructor, &args, &describe(callee))
            }

            ExprKind::Unary(op, operand) => {
                if let (UnaryOp::TypeOf, ExprKind::Ident(name)) = (op, &operand.kind) {
                    let value = scope.lookup(name).unwrap_or_default();
                    return Ok(Value::string(value.type_of()));
                }
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::TypeOf => Value::string(value.type_of()),
                })
            }

            ExprKind::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }

            ExprKind::Logical(op, left, right) => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Coalesce => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }

            ExprKind::Conditional(test, then, otherwise) => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }

            ExprKind::Assign(op, target, value) => self.assign(*op, target, value, scope),
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Scope) -> EvalResult<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg, scope)).collect()
    }

    fn assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, scope: &Scope) -> EvalResult<Value> {
        let hint = match &target.kind {
            ExprKind::Ident(name) | ExprKind::Member(_, name) => name.clone(),
            _ => String::new(),
        };
        let new_value = match op {
            AssignOp::Assign => self.eval_named(value, scope, &hint)?,
            AssignOp::AddAssign | AssignOp::SubAssign => {
                let current = self.eval(target, scope)?;
                let operand = self.eval(value, scope)?;
                let op = if op == AssignOp::AddAssign {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                binary(op, &current, &operand)
            }
        };

        match &target.kind {
            ExprKind::Ident(name) => match scope.assign(name, new_value.clone()) {
                Ok(()) => {}
                Err(AssignError::Undeclared) => {
                    return self.throw_error("ReferenceError", &format!("{name} is not defined"))
                }
                Err(AssignError::Constant) => {
                    return self.throw_error("TypeError", "Assignment to constant variable.")
                }
                Err(AssignError::Refused(refusal)) => return self.refusal_error(refusal, name),
            },
            ExprKind::Member(object, key) => {
                let object = self.eval(object, scope)?;
                self.set_property(&object, key, new_value.clone())?;
            }
            ExprKind::Index(object, key) => {
                let object = self.eval(object, scope)?;
                let key = property_key(&self.eval(key, scope)?);
                self.set_property(&object, &key, new_value.clone())?;
            }
            _ => return self.throw_error("SyntaxError", "Invalid left-hand side in assignment"),
        }
        Ok(new_value)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        other => other.to_display(),
    }
}

/// Source-like description of a callee for `is not a function` messages.
fn describe(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Member(target, key) => format!("{}.{key}", describe(target)),
        ExprKind::Index(target, _) => format!("{}[...]", describe(target)),
        ExprKind::Call(callee, _) => format!("{}(...)", describe(callee)),
        _ => "expression".into(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let numeric = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
    match op {
        BinaryOp::Add => {
            let concatenates = |v: &Value| matches!(v, Value::String(_) | Value::Object(_));
            if concatenates(left) || concatenates(right) {
                Value::from(format!("{}{}", left.to_display(), right.to_display()))
            } else {
                numeric(|a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(|a, b| a - b),
        BinaryOp::Mul => numeric(|a, b| a * b),
        BinaryOp::Div => numeric(|a, b| a / b),
        BinaryOp::Rem => numeric(|a, b| a % b),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_equals(right)),
        BinaryOp::LooseEq => Value::Bool(left.loose_equals(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_equals(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let holds = ordering.is_some_and(|ord| match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            });
            Value::Bool(holds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OutputBuffer;

    fn run(src: &str) -> (EvalResult<ObjectRef>, OutputBuffer) {
        let buffer = OutputBuffer::new();
        let mut interp = Interpreter::with_output(Box::new(buffer.clone()));
        let module = parse_module(src, "/virtual/main.mjs").expect("parse");
        let source = Rc::new(ModuleSource::new("/virtual/main.mjs", src));
        let global = interp.host_global().clone();
        let result = interp.evaluate_module(&module, source, Vec::new(), global, Realm::Host);
        (result, buffer)
    }

    fn export(ns: &ObjectRef, name: &str) -> Value {
        ns.get(name).unwrap_or_default()
    }

    #[test]
    fn exports_reflect_final_bindings() {
        let (ns, _) = run(
            "export let count = 0;
             function bump(by) { count += by; return count; }
             bump(2); bump(3);
             export const doubled = count * 2;
             export default function () { return 'named'; }",
        );
        let ns = ns.expect("module evaluates");
        assert_eq!(export(&ns, "count").to_number(), 5.0);
        assert_eq!(export(&ns, "doubled").to_number(), 10.0);
        assert!(ns.is_frozen());
    }

    #[test]
    fn closures_capture_their_environment() {
        let (ns, _) = run(
            "function counter() { let n = 0; return () => { n += 1; return n; }; }
             const next = counter();
             next(); next();
             export const value = next();",
        );
        assert_eq!(export(&ns.unwrap(), "value").to_number(), 3.0);
    }

    #[test]
    fn assigning_undeclared_name_is_reference_error() {
        let (result, _) = run("leaked = 1;");
        let thrown = result.unwrap_err();
        assert_eq!(thrown.summary(), "ReferenceError: leaked is not defined");
    }

    #[test]
    fn thrown_errors_carry_positions() {
        let (result, _) = run("function fail() {\n  throw new Error('boom');\n}\nfail();");
        let stack = result.unwrap_err().stack().expect("stack");
        assert!(stack.starts_with("Error: boom"));
        assert!(stack.contains("at fail (/virtual/main.mjs:2:9)"), "{stack}");
        assert!(stack.contains("at /virtual/main.mjs:4:1"), "{stack}");
    }

    #[test]
    fn try_catch_finally_runs_in_order() {
        let (_, out) = run(
            "try { console.log('a'); throw 'x'; } catch (e) { console.log('caught ' + e); }
             finally { console.log('done'); }",
        );
        assert_eq!(out.contents(), "a\ncaught x\ndone");
    }

    #[test]
    fn loops_and_operators_behave() {
        let (ns, _) = run(
            "let total = 0;
             for (let i = 0; i < 5; i += 1) { if (i % 2 === 0) { total += i; } }
             let j = 3; while (j > 0) { j -= 1; }
             export const result = [total, j, 1 == '1', null ?? 'fallback', typeof missing];",
        );
        let result = export(&ns.unwrap(), "result");
        let items = result.as_object().unwrap().borrow().property_values();
        assert_eq!(items[0].to_number(), 6.0);
        assert_eq!(items[1].to_number(), 0.0);
        assert!(items[2].is_truthy());
        assert_eq!(items[3].to_display(), "fallback");
        assert_eq!(items[4].to_display(), "undefined");
    }

    #[test]
    fn calling_a_non_function_names_the_callee() {
        let (result, _) = run("const o = {}; o.missing();");
        assert_eq!(result.unwrap_err().summary(), "TypeError: o.missing is not a function");
    }
}
