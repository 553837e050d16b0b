//! Lexical environments.
//!
//! A [`Scope`] is a chain of binding frames ending at a global object. Lookups
//! walk the chain outward and fall back to the global object's properties;
//! `globalThis` resolves to the global object itself without being stored as
//! a property, so the global never refers to itself.

use std::{cell::RefCell, rc::Rc};

use im::HashMap;

use crate::runtime::value::{ObjectRef, Value, WriteRefusal};

#[derive(Clone)]
struct Binding {
    value: Value,
    mutable: bool,
}

struct Frame {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
    global: ObjectRef,
}

#[derive(Clone)]
pub struct Scope(Rc<Frame>);

/// Why an assignment to a name failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignError {
    Undeclared,
    Constant,
    Refused(WriteRefusal),
}

impl Scope {
    /// A fresh top-level scope for a module or script evaluated against `global`.
    pub fn root(global: ObjectRef) -> Self {
        Self(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
            global,
        }))
    }

    pub fn child(&self) -> Self {
        Self(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
            global: self.0.global.clone(),
        }))
    }

    pub fn global(&self) -> &ObjectRef {
        &self.0.global
    }

    /// Declare `name` in this frame. Returns `false` when the name was
    /// already declared here.
    pub fn declare(&self, name: &str, value: Value, mutable: bool) -> bool {
        let previous = self
            .0
            .bindings
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
        previous.is_none()
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(binding) = current.0.bindings.borrow().get(name) {
                return Some(binding.value.clone());
            }
            scope = current.0.parent.as_ref();
        }
        if name == "globalThis" {
            return Some(Value::Object(self.0.global.clone()));
        }
        let global = &self.0.global;
        global.has(name).then(|| global.get_or_undefined(name))
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let mut bindings = current.0.bindings.borrow_mut();
            if let Some(binding) = bindings.get_mut(name) {
                if !binding.mutable {
                    return Err(AssignError::Constant);
                }
                binding.value = value;
                return Ok(());
            }
            drop(bindings);
            scope = current.0.parent.as_ref();
        }
        let global = &self.0.global;
        if !global.has(name) {
            return Err(AssignError::Undeclared);
        }
        global.set(name, value).map_err(AssignError::Refused)
    }
}
