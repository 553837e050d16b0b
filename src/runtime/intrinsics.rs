//! Intrinsic objects shared by every realm on a thread.
//!
//! The intrinsics (`Object`, `Math`, `JSON`, `Array`, `String`, `Number`, the
//! error constructors, `eval` and `console`) are created once per interpreter
//! thread and shared by the host global and every compartment global on that
//! thread. This sharing is exactly what makes lockdown necessary: a mutation
//! of `Math` in one test file would otherwise be visible to every other file.
//!
//! Hardening is applied here on behalf of [`crate::lockdown`]. The thread that
//! calls `lockdown` hardens its intrinsics eagerly; any other thread hardens
//! its own set on first access once the process is locked.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use serde_json::{Map, Number as JsonNumber, Value as Json};
use tracing::debug;

use crate::{
    errors::LockdownError,
    lockdown::{self, ConsoleTaming, EvalTaming, OverrideTaming},
    runtime::{
        interpreter::Interpreter,
        output::Stream,
        value::{format_number, ObjectClass, ObjectRef, Value},
        EvalResult, Realm,
    },
};

pub struct Intrinsics {
    entries: Vec<(&'static str, ObjectRef)>,
    console: ObjectRef,
    hardened: Cell<bool>,
}

thread_local! {
    static INTRINSICS: RefCell<Option<Rc<Intrinsics>>> = const { RefCell::new(None) };
}

/// This thread's intrinsics, created on first use and hardened if the
/// process has been locked down since.
pub fn current() -> Rc<Intrinsics> {
    let intrinsics = INTRINSICS.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(|| Rc::new(Intrinsics::create()))
            .clone()
    });
    if let Some(config) = lockdown::configuration() {
        if !intrinsics.hardened.get() {
            debug!("hardening intrinsics on first access after lockdown");
            // The process-wide lock is already set; a failure here leaves this
            // thread's set unhardened and is retried on the next access.
            if let Err(err) = intrinsics.harden(config.override_taming) {
                debug!(%err, "deferred hardening failed");
            }
        }
    }
    intrinsics
}

impl Intrinsics {
    fn create() -> Self {
        Self {
            entries: vec![
                ("Object", object_intrinsic()),
                ("Math", math_intrinsic()),
                ("JSON", json_intrinsic()),
                ("Array", array_intrinsic()),
                ("String", ObjectRef::native("String", |_, args| {
                    Ok(Value::from(args.first().map(Value::to_display).unwrap_or_default()))
                })),
                ("Number", ObjectRef::native("Number", |_, args| {
                    Ok(Value::Number(args.first().map_or(0.0, Value::to_number)))
                })),
                ("Error", error_constructor("Error")),
                ("TypeError", error_constructor("TypeError")),
                ("ReferenceError", error_constructor("ReferenceError")),
                ("RangeError", error_constructor("RangeError")),
                ("SyntaxError", error_constructor("SyntaxError")),
                ("eval", eval_intrinsic()),
            ],
            console: console_intrinsic(),
            hardened: Cell::new(false),
        }
    }

    pub fn get(&self, name: &str) -> Option<ObjectRef> {
        if name == "console" {
            return Some(self.console.clone());
        }
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, obj)| obj.clone())
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened.get()
    }

    /// Freeze every intrinsic according to `taming`.
    ///
    /// All intrinsics are checked for availability before any is frozen, so a
    /// failure leaves the whole set untouched.
    pub fn harden(&self, taming: OverrideTaming) -> Result<(), LockdownError> {
        let all = self
            .entries
            .iter()
            .map(|(name, obj)| (*name, obj))
            .chain(std::iter::once(("console", &self.console)));

        let mut targets = Vec::new();
        for (name, root) in all {
            collect_targets(root, taming, true, &mut targets);
            if targets.iter().any(|t| t.try_borrow_mut().is_none()) {
                return Err(LockdownError::Unavailable { name: name.to_string() });
            }
        }

        for target in &targets {
            target.freeze();
        }
        self.hardened.set(true);
        debug!(count = targets.len(), ?taming, "intrinsics hardened");
        Ok(())
    }
}

/// Gather the objects to freeze under `taming`, starting at `root`.
fn collect_targets(root: &ObjectRef, taming: OverrideTaming, is_root: bool, out: &mut Vec<ObjectRef>) {
    if out.iter().any(|seen| seen.ptr_eq(root)) {
        return;
    }
    let is_function = root.is_callable();
    let include = is_root || !is_function || taming == OverrideTaming::Severe;
    if !include {
        return;
    }
    out.push(root.clone());
    if taming == OverrideTaming::Min {
        return;
    }
    // A busy object is still recorded so the availability check reports it.
    let Some(children) = root.try_borrow().map(|inner| inner.property_values()) else {
        return;
    };
    for child in children {
        if let Value::Object(child) = child {
            collect_targets(&child, taming, false, out);
        }
    }
}

// ============================================================================
// GLOBAL OBJECTS
// ============================================================================

/// A fresh host global object: extensible, holding every intrinsic and the console.
pub fn host_global() -> ObjectRef {
    let intrinsics = current();
    let global = ObjectRef::ordinary();
    for (name, obj) in &intrinsics.entries {
        let _ = global.set(name, Value::Object(obj.clone()));
    }
    let _ = global.set("console", Value::Object(intrinsics.console.clone()));
    global
}

/// A compartment global object: the intrinsics plus `endowments`, then made
/// non-extensible. The host console is only shared under unsafe console
/// taming; an endowed `console` always wins.
pub fn compartment_global(endowments: &[(String, Value)]) -> ObjectRef {
    let intrinsics = current();
    let global = ObjectRef::ordinary();
    for (name, obj) in &intrinsics.entries {
        let _ = global.set(name, Value::Object(obj.clone()));
    }
    let share_console = match lockdown::configuration() {
        Some(config) => config.console_taming == ConsoleTaming::Unsafe,
        None => false,
    };
    if share_console {
        let _ = global.set("console", Value::Object(intrinsics.console.clone()));
    }
    for (name, value) in endowments {
        let _ = global.set(name, value.clone());
    }
    global.borrow_mut().prevent_extensions();
    global
}

// ============================================================================
// INTRINSIC CONSTRUCTION
// ============================================================================

fn object_intrinsic() -> ObjectRef {
    ObjectRef::from_entries([
        (
            "freeze",
            Value::Object(ObjectRef::native("freeze", |_, args| {
                let target = args.first().cloned().unwrap_or_default();
                if let Value::Object(obj) = &target {
                    obj.freeze();
                }
                Ok(target)
            })),
        ),
        (
            "isFrozen",
            Value::Object(ObjectRef::native("isFrozen", |_, args| {
                Ok(Value::Bool(match args.first() {
                    Some(Value::Object(obj)) => obj.is_frozen(),
                    _ => true,
                }))
            })),
        ),
        (
            "keys",
            Value::Object(ObjectRef::native("keys", |interp, args| {
                let obj = object_arg(interp, args, "Object.keys")?;
                let keys = obj.borrow().keys().into_iter().map(Value::from).collect();
                Ok(Value::Object(ObjectRef::array(keys)))
            })),
        ),
        (
            "values",
            Value::Object(ObjectRef::native("values", |interp, args| {
                let obj = object_arg(interp, args, "Object.values")?;
                let values = obj.borrow().property_values();
                Ok(Value::Object(ObjectRef::array(values)))
            })),
        ),
        (
            "entries",
            Value::Object(ObjectRef::native("entries", |interp, args| {
                let obj = object_arg(interp, args, "Object.entries")?;
                let entries = obj
                    .borrow()
                    .entries()
                    .into_iter()
                    .map(|(k, v)| Value::Object(ObjectRef::array(vec![Value::from(k), v])))
                    .collect();
                Ok(Value::Object(ObjectRef::array(entries)))
            })),
        ),
    ])
}

fn object_arg(interp: &Interpreter, args: &[Value], what: &str) -> EvalResult<ObjectRef> {
    match args.first() {
        Some(Value::Object(obj)) => Ok(obj.clone()),
        _ => interp.throw_error("TypeError", &format!("{what} called on non-object")),
    }
}

fn math_intrinsic() -> ObjectRef {
    fn fold(name: &'static str, init: f64, pick: fn(f64, f64) -> f64) -> Value {
        Value::Object(ObjectRef::native(name, move |_, args| {
            Ok(Value::Number(args.iter().map(Value::to_number).fold(init, |acc, n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    pick(acc, n)
                }
            })))
        }))
    }
    fn unary(name: &'static str, f: fn(f64) -> f64) -> Value {
        Value::Object(ObjectRef::native(name, move |_, args| {
            Ok(Value::Number(f(args.first().map_or(f64::NAN, Value::to_number))))
        }))
    }

    ObjectRef::from_entries([
        ("max", fold("max", f64::NEG_INFINITY, f64::max)),
        ("min", fold("min", f64::INFINITY, f64::min)),
        ("floor", unary("floor", f64::floor)),
        ("ceil", unary("ceil", f64::ceil)),
        ("round", unary("round", |n| (n + 0.5).floor())),
        ("abs", unary("abs", f64::abs)),
        ("PI", Value::Number(std::f64::consts::PI)),
    ])
}

fn json_intrinsic() -> ObjectRef {
    ObjectRef::from_entries([
        (
            "stringify",
            Value::Object(ObjectRef::native("stringify", |interp, args| {
                let value = args.first().cloned().unwrap_or_default();
                let Some(json) = to_json(&value) else {
                    return Ok(Value::Undefined);
                };
                let pretty = args.get(2).is_some_and(|indent| indent.to_number() > 0.0);
                let text = if pretty {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                match text {
                    Ok(text) => Ok(Value::from(text)),
                    Err(err) => interp.throw_error("TypeError", &err.to_string()),
                }
            })),
        ),
        (
            "parse",
            Value::Object(ObjectRef::native("parse", |interp, args| {
                let text = args.first().map(Value::to_display).unwrap_or_default();
                match serde_json::from_str::<Json>(&text) {
                    Ok(json) => Ok(from_json(&json)),
                    Err(err) => interp.throw_error("SyntaxError", &err.to_string()),
                }
            })),
        ),
    ])
}

fn array_intrinsic() -> ObjectRef {
    ObjectRef::from_entries([(
        "isArray",
        Value::Object(ObjectRef::native("isArray", |_, args| {
            Ok(Value::Bool(matches!(
                args.first(),
                Some(Value::Object(obj)) if matches!(obj.borrow().class, ObjectClass::Array(_))
            )))
        })),
    )])
}

fn error_constructor(name: &'static str) -> ObjectRef {
    ObjectRef::constructor(name, move |interp, args| {
        let message = match args.first() {
            None | Some(Value::Undefined) => String::new(),
            Some(value) => value.to_display(),
        };
        Ok(Value::Object(interp.make_error(name, &message)))
    })
}

fn eval_intrinsic() -> ObjectRef {
    ObjectRef::native("eval", |interp, args| {
        let Some(text) = args.first().and_then(Value::as_str).map(str::to_string) else {
            return Ok(args.first().cloned().unwrap_or_default());
        };
        let realm = interp.current_realm();
        if let Some(config) = lockdown::configuration() {
            match config.eval_taming {
                EvalTaming::NoEval => {
                    return interp.throw_error("TypeError", "eval is disabled by lockdown (evalTaming: noEval)");
                }
                EvalTaming::SafeEval if realm == Realm::Host => {
                    return interp.throw_error(
                        "TypeError",
                        "eval is only available inside compartments (evalTaming: safeEval)",
                    );
                }
                _ => {}
            }
        }
        let global = interp.current_global();
        interp.evaluate_script(&text, "<eval>", global, realm)
    })
}

fn console_intrinsic() -> ObjectRef {
    fn method(name: &'static str, stream: Stream) -> Value {
        Value::Object(ObjectRef::native(name, move |interp, args| {
            let line = args.iter().map(inspect).collect::<Vec<_>>().join(" ");
            interp.emit(stream, &line);
            Ok(Value::Undefined)
        }))
    }

    ObjectRef::from_entries([
        ("log", method("log", Stream::Out)),
        ("info", method("info", Stream::Out)),
        ("error", method("error", Stream::Err)),
        ("warn", method("warn", Stream::Err)),
    ])
}

/// How `console.log` renders a value.
pub fn inspect(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Object(obj) if obj.is_error() => obj
            .get("stack")
            .map(|stack| stack.to_display())
            .unwrap_or_else(|| value.to_display()),
        Value::Object(obj) if obj.is_callable() => {
            let name = obj.callable().map(|c| c.name().to_string()).unwrap_or_default();
            format!("[Function: {}]", if name.is_empty() { "(anonymous)" } else { name.as_str() })
        }
        Value::Object(_) => to_json(value)
            .and_then(|json| serde_json::to_string(&json).ok())
            .unwrap_or_else(|| value.to_display()),
        other => other.to_display(),
    }
}

// ============================================================================
// JSON CONVERSION
// ============================================================================

/// Convert a runtime value to JSON, dropping what `JSON.stringify` drops.
pub fn to_json(value: &Value) -> Option<Json> {
    to_json_depth(value, 0)
}

fn to_json_depth(value: &Value, depth: usize) -> Option<Json> {
    if depth > 64 {
        return Some(Json::Null);
    }
    Some(match value {
        Value::Undefined => return None,
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) if !n.is_finite() => Json::Null,
        Value::Number(n) if *n == n.trunc() && n.abs() < 9e15 => Json::Number(JsonNumber::from(*n as i64)),
        Value::Number(n) => JsonNumber::from_f64(*n).map_or(Json::Null, Json::Number),
        Value::String(s) => Json::String(s.to_string()),
        Value::Object(obj) => {
            let inner = obj.borrow();
            match &inner.class {
                ObjectClass::Function(_) => return None,
                ObjectClass::Array(items) => Json::Array(
                    items
                        .iter()
                        .map(|item| to_json_depth(item, depth + 1).unwrap_or(Json::Null))
                        .collect(),
                ),
                _ => {
                    let mut map = Map::new();
                    for (key, value) in inner.entries() {
                        if let Some(json) = to_json_depth(&value, depth + 1) {
                            map.insert(key, json);
                        }
                    }
                    Json::Object(map)
                }
            }
        }
    })
}

pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::string(s),
        Json::Array(items) => Value::Object(ObjectRef::array(items.iter().map(from_json).collect())),
        Json::Object(map) => Value::Object(ObjectRef::from_entries(
            map.iter().map(|(k, v)| (k.clone(), from_json(v))),
        )),
    }
}

// ============================================================================
// PRIMITIVE AND ARRAY METHODS
// ============================================================================

/// Properties of string primitives: `length`, indices and a few methods.
pub fn string_property(s: &Rc<str>, key: &str) -> Option<Value> {
    if key == "length" {
        return Some(Value::Number(s.chars().count() as f64));
    }
    if let Ok(index) = key.parse::<usize>() {
        return s.chars().nth(index).map(|c| Value::from(c.to_string()));
    }

    let receiver = s.clone();
    let method = move |name: &'static str, f: fn(&str, &[Value]) -> Value| {
        let receiver = receiver.clone();
        Some(Value::Object(ObjectRef::native(name, move |_, args| Ok(f(&receiver, args)))))
    };
    match key {
        "includes" => method("includes", |s, args| Value::Bool(s.contains(&text_arg(args)))),
        "startsWith" => method("startsWith", |s, args| Value::Bool(s.starts_with(&text_arg(args)))),
        "endsWith" => method("endsWith", |s, args| Value::Bool(s.ends_with(&text_arg(args)))),
        "indexOf" => method("indexOf", |s, args| {
            let needle = text_arg(args);
            Value::Number(s.find(&needle).map_or(-1.0, |i| s[..i].chars().count() as f64))
        }),
        "toUpperCase" => method("toUpperCase", |s, _| Value::from(s.to_uppercase())),
        "toLowerCase" => method("toLowerCase", |s, _| Value::from(s.to_lowercase())),
        "trim" => method("trim", |s, _| Value::from(s.trim())),
        "split" => method("split", |s, args| {
            let separator = text_arg(args);
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).map(Value::from).collect()
            };
            Value::Object(ObjectRef::array(parts))
        }),
        "replaceAll" => method("replaceAll", |s, args| {
            let from = text_arg(args);
            let to = args.get(1).map(Value::to_display).unwrap_or_default();
            if from.is_empty() {
                Value::string(s)
            } else {
                Value::from(s.replace(&from, &to))
            }
        }),
        "slice" => method("slice", |s, args| {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), args);
            Value::from(chars[start..end].iter().collect::<String>())
        }),
        _ => None,
    }
}

/// Methods available on array objects, bound to `receiver`.
pub fn array_method(receiver: &ObjectRef, key: &str) -> Option<ObjectRef> {
    if !matches!(receiver.borrow().class, ObjectClass::Array(_)) {
        return None;
    }
    let array = receiver.clone();
    let items = move || match &array.borrow().class {
        ObjectClass::Array(items) => items.clone(),
        _ => Vec::new(),
    };
    let target = receiver.clone();

    let method = match key {
        "push" => ObjectRef::native("push", move |interp, args| {
            for arg in args {
                let index = format_number(target.get_or_undefined("length").to_number());
                if target.set(&index, arg.clone()).is_err() {
                    return interp.throw_error("TypeError", "Cannot add property to a frozen array");
                }
            }
            Ok(target.get_or_undefined("length"))
        }),
        "join" => ObjectRef::native("join", move |_, args| {
            let separator = args.first().map_or_else(|| ",".to_string(), Value::to_display);
            let joined = items()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::from(joined))
        }),
        "includes" => ObjectRef::native("includes", move |_, args| {
            let needle = args.first().cloned().unwrap_or_default();
            Ok(Value::Bool(items().iter().any(|v| v.strict_equals(&needle))))
        }),
        "indexOf" => ObjectRef::native("indexOf", move |_, args| {
            let needle = args.first().cloned().unwrap_or_default();
            let index = items().iter().position(|v| v.strict_equals(&needle));
            Ok(Value::Number(index.map_or(-1.0, |i| i as f64)))
        }),
        "slice" => ObjectRef::native("slice", move |_, args| {
            let all = items();
            let (start, end) = slice_bounds(all.len(), args);
            Ok(Value::Object(ObjectRef::array(all[start..end].to_vec())))
        }),
        "map" => ObjectRef::native("map", move |interp, args| {
            let callback = args.first().cloned().unwrap_or_default();
            let mut mapped = Vec::new();
            for (index, item) in items().into_iter().enumerate() {
                mapped.push(interp.call(&callback, &[item, Value::Number(index as f64)])?);
            }
            Ok(Value::Object(ObjectRef::array(mapped)))
        }),
        "filter" => ObjectRef::native("filter", move |interp, args| {
            let callback = args.first().cloned().unwrap_or_default();
            let mut kept = Vec::new();
            for (index, item) in items().into_iter().enumerate() {
                if interp.call(&callback, &[item.clone(), Value::Number(index as f64)])?.is_truthy() {
                    kept.push(item);
                }
            }
            Ok(Value::Object(ObjectRef::array(kept)))
        }),
        "forEach" => ObjectRef::native("forEach", move |interp, args| {
            let callback = args.first().cloned().unwrap_or_default();
            for (index, item) in items().into_iter().enumerate() {
                interp.call(&callback, &[item, Value::Number(index as f64)])?;
            }
            Ok(Value::Undefined)
        }),
        _ => return None,
    };
    Some(method)
}

fn text_arg(args: &[Value]) -> String {
    args.first().map(Value::to_display).unwrap_or_default()
}

fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let resolve = |value: Option<&Value>, default: usize| match value {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0
            } else if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            }
        }
    };
    let start = resolve(args.first(), 0);
    let end = resolve(args.get(1), len).max(start);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compartment_globals_are_not_extensible() {
        let global = compartment_global(&[("answer".to_string(), Value::Number(42.0))]);
        assert!(global.get("Math").is_some());
        assert!(global.get("answer").is_some());
        assert!(global.set("fresh", Value::Null).is_err());
        assert!(global.set("answer", Value::Null).is_ok());
    }

    #[test]
    fn globals_share_the_thread_intrinsics() {
        let host = host_global();
        let compartment = compartment_global(&[]);
        let (Some(Value::Object(a)), Some(Value::Object(b))) = (host.get("Math"), compartment.get("Math")) else {
            panic!("Math missing");
        };
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn json_conversion_drops_functions_and_undefined() {
        let obj = ObjectRef::from_entries([
            ("n", Value::Number(1.0)),
            ("u", Value::Undefined),
            ("f", Value::Object(ObjectRef::native("f", |_, _| Ok(Value::Undefined)))),
            ("a", Value::Object(ObjectRef::array(vec![Value::Bool(true), Value::Undefined]))),
        ]);
        let json = to_json(&Value::Object(obj)).unwrap();
        assert_eq!(json.to_string(), r#"{"n":1,"a":[true,null]}"#);
    }

    #[test]
    fn severe_taming_freezes_function_property_bags() {
        let root = ObjectRef::from_entries([(
            "helper",
            Value::Object(ObjectRef::native("helper", |_, _| Ok(Value::Undefined))),
        )]);
        let mut moderate = Vec::new();
        collect_targets(&root, OverrideTaming::Moderate, true, &mut moderate);
        let mut severe = Vec::new();
        collect_targets(&root, OverrideTaming::Severe, true, &mut severe);
        assert_eq!(moderate.len(), 1);
        assert_eq!(severe.len(), 2);
    }
}
