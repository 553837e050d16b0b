//! Built-in modules served under the `cloister:` scheme.
//!
//! | specifier | exports |
//! |---|---|
//! | `cloister:assert` | `ok`, `equal`, `notEqual`, `deepEqual`, `throws` |
//! | `cloister:lockdown` | `lockdown` |
//! | `cloister:compartment` | `loadCompartment` |
//! | `cloister:wrapper` | `remapError` |
//!
//! `cloister:test` is provided by the runner because it closes over the test
//! harness (see [`crate::runner::harness`]).

use difference::{Changeset, Difference};
use miette::Diagnostic;

use crate::{
    compartment::{resolve_local, BuiltinImportHook, Compartment, FsReadHook, LoadOptions},
    errors::CompartmentError,
    lockdown::{self, LockdownConfiguration},
    runtime::{
        intrinsics::{inspect, to_json},
        module::make_namespace,
        EvalResult, Interpreter, ObjectRef, Thrown, Value,
    },
    wrapper::stack::remap_error,
};

/// Register every host-independent built-in module on `interp`.
pub fn install(interp: &mut Interpreter) {
    interp.register_builtin("cloister:assert", assert_module());
    interp.register_builtin("cloister:lockdown", lockdown_module());
    interp.register_builtin("cloister:compartment", compartment_module());
    interp.register_builtin("cloister:wrapper", wrapper_module());
}

fn function(name: &'static str, f: fn(&mut Interpreter, &[Value]) -> EvalResult<Value>) -> (String, Value) {
    (name.to_string(), Value::Object(ObjectRef::native(name, f)))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

// ============================================================================
// cloister:assert
// ============================================================================

fn assert_module() -> ObjectRef {
    make_namespace([
        function("ok", assert_ok),
        function("equal", assert_equal),
        function("notEqual", assert_not_equal),
        function("deepEqual", assert_deep_equal),
        function("throws", assert_throws),
    ])
}

fn assertion_error<T>(
    interp: &Interpreter,
    message: &str,
    actual: Value,
    expected: Value,
    operator: &str,
) -> EvalResult<T> {
    let error = interp.make_error("AssertionError", message);
    {
        let mut inner = error.borrow_mut();
        let _ = inner.set("actual", actual);
        let _ = inner.set("expected", expected);
        let _ = inner.set("operator", Value::string(operator));
    }
    Err(Thrown(Value::Object(error)))
}

fn custom_message(args: &[Value], index: usize) -> Option<String> {
    args.get(index)
        .filter(|m| !m.is_nullish())
        .map(Value::to_display)
}

fn assert_ok(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let value = arg(args, 0);
    if value.is_truthy() {
        return Ok(Value::Undefined);
    }
    let message = custom_message(args, 1)
        .unwrap_or_else(|| "The expression evaluated to a falsy value".into());
    assertion_error(interp, &message, value, Value::Bool(true), "==")
}

fn assert_equal(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let (actual, expected) = (arg(args, 0), arg(args, 1));
    if actual.strict_equals(&expected) {
        return Ok(Value::Undefined);
    }
    let message = custom_message(args, 2).unwrap_or_else(|| {
        format!(
            "Expected values to be strictly equal:\n\n{} !== {}",
            inspect_quoted(&actual),
            inspect_quoted(&expected)
        )
    });
    assertion_error(interp, &message, actual, expected, "strictEqual")
}

fn assert_not_equal(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let (actual, expected) = (arg(args, 0), arg(args, 1));
    if !actual.strict_equals(&expected) {
        return Ok(Value::Undefined);
    }
    let message = custom_message(args, 2).unwrap_or_else(|| {
        format!("Expected \"actual\" to be strictly unequal to: {}", inspect_quoted(&expected))
    });
    assertion_error(interp, &message, actual, expected, "notStrictEqual")
}

fn assert_deep_equal(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let (actual, expected) = (arg(args, 0), arg(args, 1));
    if actual.deep_equals(&expected) {
        return Ok(Value::Undefined);
    }
    let message = custom_message(args, 2).unwrap_or_else(|| {
        format!(
            "Expected values to be deeply equal:\n+ actual - expected\n\n{}",
            diff(&pretty(&actual), &pretty(&expected))
        )
    });
    assertion_error(interp, &message, actual, expected, "deepStrictEqual")
}

fn assert_throws(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let block = arg(args, 0);
    let expected = arg(args, 1);
    let thrown = match interp.call(&block, &[]) {
        Ok(_) => {
            return assertion_error(interp, "Missing expected exception.", Value::Undefined, expected, "throws")
        }
        Err(Thrown(value)) => value,
    };

    let matches = match &expected {
        Value::Undefined => true,
        Value::Object(ctor) if ctor.is_callable() => {
            let wanted = ctor.callable().map(|c| c.name().to_string()).unwrap_or_default();
            thrown
                .as_object()
                .and_then(|obj| obj.get("name"))
                .is_some_and(|name| name.to_display() == wanted)
        }
        Value::Object(shape) => shape.borrow().entries().iter().all(|(key, want)| {
            thrown
                .as_object()
                .and_then(|obj| obj.get(key))
                .is_some_and(|got| got.deep_equals(want))
        }),
        Value::String(fragment) => Thrown(thrown.clone()).summary().contains(&**fragment),
        _ => false,
    };
    if matches {
        return Ok(Value::Undefined);
    }
    let message = format!(
        "The error thrown did not match the expectation: {}",
        Thrown(thrown.clone()).summary()
    );
    assertion_error(interp, &message, thrown, expected, "throws")
}

fn inspect_quoted(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => inspect(other),
    }
}

fn pretty(value: &Value) -> String {
    to_json(value)
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| inspect(value))
}

/// Line diff of two renderings, `+` for actual and `-` for expected.
fn diff(actual: &str, expected: &str) -> String {
    let changeset = Changeset::new(expected, actual, "\n");
    let mut lines = Vec::new();
    for change in &changeset.diffs {
        let (prefix, text) = match change {
            Difference::Same(text) => ("  ", text),
            Difference::Add(text) => ("+ ", text),
            Difference::Rem(text) => ("- ", text),
        };
        lines.extend(text.lines().map(|line| format!("{prefix}{line}")));
    }
    lines.join("\n")
}

// ============================================================================
// cloister:lockdown
// ============================================================================

fn lockdown_module() -> ObjectRef {
    make_namespace([function("lockdown", lockdown_fn)])
}

fn lockdown_fn(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let json = to_json(&arg(args, 0)).unwrap_or_else(|| serde_json::json!({}));
    let result = LockdownConfiguration::from_json(json).and_then(lockdown::lockdown);
    match result {
        Ok(_) => Ok(Value::Undefined),
        Err(err) => interp.throw_error("TypeError", &err.to_string()),
    }
}

// ============================================================================
// cloister:compartment
// ============================================================================

fn compartment_module() -> ObjectRef {
    make_namespace([function("loadCompartment", load_compartment)])
}

/// `loadCompartment(location, endowments?)`: load `location` in a fresh
/// compartment whose only extra globals are the endowment object's entries.
fn load_compartment(interp: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let Some(location) = args.first().and_then(Value::as_str).map(str::to_string) else {
        return interp.throw_error("TypeError", "loadCompartment expects a module location string");
    };
    let location = match interp.current_location() {
        Some(importer) if !location.starts_with('/') => resolve_local(&importer, &location),
        _ => location,
    };

    let mut options = LoadOptions::new(
        Box::new(BuiltinImportHook::from_interpreter(interp)),
        Box::new(FsReadHook),
    );
    if let Value::Object(endowments) = arg(args, 1) {
        options.globals = endowments.borrow().entries();
    }

    match Compartment::load(interp, &location, options) {
        Ok(namespace) => Ok(Value::Object(namespace)),
        Err(err) => Err(compartment_failure(interp, err)),
    }
}

/// Surface a loader failure to script code. Evaluation failures rethrow the
/// original value; everything else becomes an `Error` carrying its
/// diagnostic code.
fn compartment_failure(interp: &Interpreter, err: CompartmentError) -> Thrown {
    if let CompartmentError::Evaluation { thrown, .. } = err {
        return thrown;
    }
    let error = interp.make_error("Error", &err.to_string());
    if let Some(code) = err.code() {
        let _ = error.set("code", Value::from(code.to_string()));
    }
    let _ = error.set("location", Value::string(err.failing_location()));
    Thrown(Value::Object(error))
}

// ============================================================================
// cloister:wrapper
// ============================================================================

fn wrapper_module() -> ObjectRef {
    make_namespace([function("remapError", remap_error_fn)])
}

fn remap_error_fn(_: &mut Interpreter, args: &[Value]) -> EvalResult<Value> {
    let from = arg(args, 1).to_display();
    let to = arg(args, 2).to_display();
    Ok(remap_error(&arg(args, 0), &from, &to))
}
