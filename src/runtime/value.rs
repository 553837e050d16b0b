//! Runtime values and the object model.
//!
//! Objects are shared, interior-mutable cells (`Rc<RefCell<Object>>`). Property
//! storage preserves insertion order so enumeration and `JSON.stringify` are
//! deterministic. Freezing and extensibility are enforced at this layer so
//! every writer (interpreter, natives, hardening) sees the same rules.

use std::{
    cell::RefCell,
    collections::HashSet,
    fmt,
    rc::Rc,
};

use crate::runtime::{interpreter::Interpreter, Closure, EvalResult};

// ============================================================================
// VALUE
// ============================================================================

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(obj) if obj.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Object(_) => f64::NAN,
        }
    }

    /// String conversion as performed by `String(v)` and `+` concatenation.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Object(obj) => obj.to_display(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_))
                if !self.is_nullish() && !other.is_nullish() =>
            {
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// Structural equality used by `assert.deepEqual`. A pair of objects
    /// already under comparison counts as equal, so cyclic structures
    /// terminate.
    pub fn deep_equals(&self, other: &Value) -> bool {
        self.deep_equals_in(other, &mut HashSet::new())
    }

    fn deep_equals_in(&self, other: &Value, seen: &mut HashSet<(*const RefCell<Object>, *const RefCell<Object>)>) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) || !seen.insert((a.as_ptr(), b.as_ptr())) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                match (&a.class, &b.class) {
                    (ObjectClass::Array(x), ObjectClass::Array(y)) => {
                        x.len() == y.len() && x.iter().zip(y).all(|(l, r)| l.deep_equals_in(r, seen))
                    }
                    (ObjectClass::Function(_), _) | (_, ObjectClass::Function(_)) => false,
                    _ => {
                        a.properties.len() == b.properties.len()
                            && a.properties.iter().all(|(key, value)| {
                                b.get_own(key).is_some_and(|other| value.deep_equals_in(&other, seen))
                            })
                    }
                }
            }
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(obj) => write!(f, "{}", obj.to_display()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else if n == n.trunc() && n.abs() < 9.007_199_254_740_992e15 {
        format!("{}", n as i64)
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

// ============================================================================
// OBJECTS
// ============================================================================

pub type NativeFn = dyn Fn(&mut Interpreter, &[Value]) -> EvalResult<Value>;

#[derive(Clone)]
pub enum Callable {
    Closure(Rc<Closure>),
    Native {
        name: Rc<str>,
        func: Rc<NativeFn>,
        constructor: bool,
    },
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Closure(closure) => &closure.name,
            Callable::Native { name, .. } => name,
        }
    }
}

#[derive(Clone)]
pub enum ObjectClass {
    Ordinary,
    Array(Vec<Value>),
    Function(Callable),
    Error,
    Namespace,
}

pub struct Object {
    pub class: ObjectClass,
    properties: Vec<(String, Value)>,
    extensible: bool,
    frozen: bool,
}

/// Why a property write was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRefusal {
    Frozen,
    NotExtensible,
}

impl Object {
    pub fn new(class: ObjectClass) -> Self {
        Self {
            class,
            properties: Vec::new(),
            extensible: true,
            frozen: false,
        }
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        if let ObjectClass::Array(items) = &self.class {
            if key == "length" {
                return Some(Value::Number(items.len() as f64));
            }
            if let Ok(index) = key.parse::<usize>() {
                return items.get(index).cloned();
            }
        }
        if let ObjectClass::Function(callable) = &self.class {
            if key == "name" && !self.has_own(key) {
                return Some(Value::string(callable.name()));
            }
        }
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.properties.iter().any(|(k, _)| k == key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<(), WriteRefusal> {
        if self.frozen {
            return Err(WriteRefusal::Frozen);
        }
        if let ObjectClass::Array(items) = &mut self.class {
            if let Ok(index) = key.parse::<usize>() {
                if index < items.len() {
                    items[index] = value;
                    return Ok(());
                }
                if index == items.len() && self.extensible {
                    items.push(value);
                    return Ok(());
                }
            }
        }
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
            return Ok(());
        }
        if !self.extensible {
            return Err(WriteRefusal::NotExtensible);
        }
        self.properties.push((key.to_string(), value));
        Ok(())
    }

    /// Own enumerable keys in insertion order (array indices first).
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let ObjectClass::Array(items) = &self.class {
            keys.extend((0..items.len()).map(|i| i.to_string()));
        }
        keys.extend(self.properties.iter().map(|(k, _)| k.clone()));
        keys
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get_own(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn property_values(&self) -> Vec<Value> {
        let mut values: Vec<Value> = Vec::new();
        if let ObjectClass::Array(items) = &self.class {
            values.extend(items.iter().cloned());
        }
        values.extend(self.properties.iter().map(|(_, v)| v.clone()));
        values
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
        self.extensible = false;
    }

    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_extensible(&self) -> bool {
        self.extensible
    }
}

/// Shared handle to an [`Object`].
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl ObjectRef {
    pub fn new(class: ObjectClass) -> Self {
        Self(Rc::new(RefCell::new(Object::new(class))))
    }

    pub fn ordinary() -> Self {
        Self::new(ObjectClass::Ordinary)
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::new(ObjectClass::Array(items))
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let obj = Self::ordinary();
        {
            let mut inner = obj.0.borrow_mut();
            for (key, value) in entries {
                inner.properties.push((key.into(), value));
            }
        }
        obj
    }

    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Value]) -> EvalResult<Value> + 'static,
    {
        Self::new(ObjectClass::Function(Callable::Native {
            name: Rc::from(name),
            func: Rc::new(func),
            constructor: false,
        }))
    }

    pub fn constructor<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Value]) -> EvalResult<Value> + 'static,
    {
        Self::new(ObjectClass::Function(Callable::Native {
            name: Rc::from(name),
            func: Rc::new(func),
            constructor: true,
        }))
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    pub fn try_borrow(&self) -> Option<std::cell::Ref<'_, Object>> {
        self.0.try_borrow().ok()
    }

    pub fn try_borrow_mut(&self) -> Option<std::cell::RefMut<'_, Object>> {
        self.0.try_borrow_mut().ok()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the underlying cell.
    pub fn as_ptr(&self) -> *const RefCell<Object> {
        Rc::as_ptr(&self.0)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get_own(key)
    }

    pub fn get_or_undefined(&self, key: &str) -> Value {
        self.get(key).unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), WriteRefusal> {
        self.0.borrow_mut().set(key, value)
    }

    pub fn has(&self, key: &str) -> bool {
        let inner = self.0.borrow();
        inner.has_own(key) || inner.get_own(key).is_some()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.0.borrow().class, ObjectClass::Function(_))
    }

    pub fn callable(&self) -> Option<Callable> {
        match &self.0.borrow().class {
            ObjectClass::Function(callable) => Some(callable.clone()),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.0.borrow().class, ObjectClass::Error)
    }

    pub fn freeze(&self) {
        self.0.borrow_mut().freeze();
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().is_frozen()
    }

    fn to_display(&self) -> String {
        self.display_in(&mut Vec::new())
    }

    /// Objects already on `path` render as the empty string, as `join` does
    /// for cyclic arrays.
    fn display_in(&self, path: &mut Vec<*const RefCell<Object>>) -> String {
        if path.contains(&self.as_ptr()) {
            return String::new();
        }
        path.push(self.as_ptr());
        let field = |value: &Value, path: &mut Vec<_>| match value {
            Value::Object(obj) => obj.display_in(path),
            other => other.to_display(),
        };
        let inner = self.0.borrow();
        let text = match &inner.class {
            ObjectClass::Array(items) => items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { field(v, path) })
                .collect::<Vec<_>>()
                .join(","),
            ObjectClass::Function(callable) => format!("function {}() {{ [code] }}", callable.name()),
            ObjectClass::Error => {
                let name = inner.get_own("name").map(|v| field(&v, path)).unwrap_or_else(|| "Error".into());
                match inner.get_own("message").map(|v| field(&v, path)) {
                    Some(message) if !message.is_empty() => format!("{name}: {message}"),
                    _ => name,
                }
            }
            ObjectClass::Ordinary | ObjectClass::Namespace => "[object Object]".into(),
        };
        path.pop();
        text
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.to_display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_integers_format_without_saturating() {
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(-1e20), "-100000000000000000000");
        assert_eq!(format_number(9_007_199_254_740_993.0), "9007199254740992");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.5), "1.5");
    }

    #[test]
    fn self_referencing_objects_compare_structurally() {
        let a = ObjectRef::new(ObjectClass::Ordinary);
        let b = ObjectRef::new(ObjectClass::Ordinary);
        a.set("self", Value::Object(a.clone())).unwrap();
        b.set("self", Value::Object(b.clone())).unwrap();
        assert!(Value::Object(a.clone()).deep_equals(&Value::Object(b.clone())));

        b.set("extra", Value::Number(1.0)).unwrap();
        assert!(!Value::Object(a).deep_equals(&Value::Object(b)));
    }

    #[test]
    fn cyclic_arrays_display_like_join() {
        let items = ObjectRef::array(vec![Value::Number(1.0)]);
        let outer = ObjectRef::array(vec![Value::Object(items.clone()), Value::Number(2.0)]);
        items.set("1", Value::Object(outer.clone())).unwrap();
        assert_eq!(Value::Object(outer).to_display(), "1,,2");
    }
}
