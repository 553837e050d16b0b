//! Stack rewriting for errors escaping a generated wrapper.

use crate::runtime::{ObjectClass, ObjectRef, Value};

/// Replace every occurrence of `from` in `stack` with `to`.
pub fn rewrite_stack(stack: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return stack.to_string();
    }
    stack.replace(from, to)
}

/// Rebuild a thrown error so that its stack names `to` wherever it named
/// `from`. The copy keeps the name, message and every enumerable own
/// property. Values that are not objects come back unchanged.
pub fn remap_error(error: &Value, from: &str, to: &str) -> Value {
    let Value::Object(original) = error else {
        return error.clone();
    };

    let class = if original.is_error() {
        ObjectClass::Error
    } else {
        ObjectClass::Ordinary
    };
    let copy = ObjectRef::new(class);
    {
        let source = original.borrow();
        let mut target = copy.borrow_mut();
        for (key, value) in source.entries() {
            let value = match (key.as_str(), &value) {
                ("stack", Value::String(stack)) => Value::from(rewrite_stack(stack, from, to)),
                _ => value,
            };
            let _ = target.set(&key, value);
        }
    }
    Value::Object(copy)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAPPER: &str = "/work/.cloister/cloister-wrapper-a.test.mjs";
    const ORIGINAL: &str = "/work/test/a.test.mjs";

    fn error_with_stack(stack: &str) -> Value {
        let error = ObjectRef::new(ObjectClass::Error);
        let _ = error.set("name", Value::from("TypeError"));
        let _ = error.set("message", Value::from("boom"));
        let _ = error.set("stack", Value::from(stack));
        let _ = error.set("code", Value::from("E_BOOM"));
        Value::Object(error)
    }

    #[test]
    fn every_wrapper_occurrence_is_replaced() {
        let stack = format!("TypeError: boom\n    at {WRAPPER}:3:5\n    at run ({WRAPPER}:9:1)");
        let rewritten = rewrite_stack(&stack, WRAPPER, ORIGINAL);
        assert_eq!(rewritten.matches(WRAPPER).count(), 0);
        assert_eq!(rewritten.matches(ORIGINAL).count(), 2);
    }

    #[test]
    fn remapped_error_keeps_own_properties() {
        let stack = format!("TypeError: boom\n    at {WRAPPER}:3:5");
        let original = error_with_stack(&stack);
        let remapped = remap_error(&original, WRAPPER, ORIGINAL);

        let obj = remapped.as_object().unwrap();
        assert!(obj.is_error());
        assert!(!obj.ptr_eq(original.as_object().unwrap()));
        assert_eq!(obj.get_or_undefined("name").to_display(), "TypeError");
        assert_eq!(obj.get_or_undefined("message").to_display(), "boom");
        assert_eq!(obj.get_or_undefined("code").to_display(), "E_BOOM");
        let stack = obj.get_or_undefined("stack").to_display();
        assert!(!stack.contains(WRAPPER));
        assert!(stack.contains(ORIGINAL));
    }

    #[test]
    fn primitives_pass_through() {
        let thrown = Value::from("plain string");
        assert!(remap_error(&thrown, WRAPPER, ORIGINAL).strict_equals(&thrown));
    }
}
