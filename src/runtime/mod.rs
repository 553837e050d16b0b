//! The Cloister runtime: values, scopes, intrinsics and the tree-walking
//! interpreter that evaluates parsed modules.
//!
//! ## Realms
//!
//! Code runs either in the host realm (test files loaded by the host pipeline)
//! or in a compartment realm. Both share the per-thread intrinsics; what
//! differs is the global object a module sees and how lockdown taming applies
//! to it (evaluator availability, console exposure).
//!
//! ## Thrown values
//!
//! Script exceptions propagate as [`Thrown`] through `Result`. They are plain
//! values: anything can be thrown, and error objects keep their `name`,
//! `message` and `stack` properties intact across loader boundaries.

pub mod interpreter;
pub mod intrinsics;
pub mod module;
pub mod output;
pub mod scope;
pub mod source;
pub mod stack;
pub mod value;

use std::{fmt, rc::Rc};

use crate::syntax::ast::FunctionDef;

pub use interpreter::Interpreter;
pub use module::{link_imports, LinkError};
pub use output::{OutputBuffer, OutputSink, StdoutSink, Stream};
pub use scope::Scope;
pub use source::ModuleSource;
pub use value::{Callable, ObjectClass, ObjectRef, Value};

/// Which kind of realm a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realm {
    Host,
    Compartment,
}

/// A user-defined function value: its definition plus the environment it closed over.
pub struct Closure {
    pub name: Rc<str>,
    pub def: Rc<FunctionDef>,
    pub scope: Scope,
    pub source: Rc<ModuleSource>,
    pub realm: Realm,
}

/// A value thrown by script code.
#[derive(Clone)]
pub struct Thrown(pub Value);

pub type EvalResult<T> = Result<T, Thrown>;

impl Thrown {
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// One-line description: `Name: message` for error objects, the string
    /// conversion otherwise.
    pub fn summary(&self) -> String {
        match &self.0 {
            Value::Object(obj) if obj.is_error() || obj.has("message") => {
                let name = obj.get("name").map(|v| v.to_display()).unwrap_or_else(|| "Error".into());
                let message = obj.get_or_undefined("message").to_display();
                if message.is_empty() {
                    name
                } else {
                    format!("{name}: {message}")
                }
            }
            Value::String(s) => s.to_string(),
            other => format!("Uncaught {}", other.to_display()),
        }
    }

    /// The captured stack of a thrown error object, when it has one.
    pub fn stack(&self) -> Option<String> {
        self.0
            .as_object()
            .and_then(|obj| obj.get("stack"))
            .and_then(|stack| stack.as_str().map(str::to_string))
    }
}

impl fmt::Debug for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thrown({})", self.summary())
    }
}
