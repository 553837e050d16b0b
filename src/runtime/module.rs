//! Module linking helpers shared by the host pipeline and compartments.

use std::collections::HashMap;

use crate::{
    runtime::value::{ObjectClass, ObjectRef, Value},
    syntax::ast::{ImportBindings, Module},
};

/// An import names something its dependency does not export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkError {
    pub specifier: String,
    pub name: String,
}

/// Resolve a module's import declarations against the namespaces of its
/// already-evaluated dependencies, keyed by specifier as written.
///
/// Returns the `(local, value)` bindings to seed the module scope with.
pub fn link_imports(
    module: &Module,
    namespaces: &HashMap<String, ObjectRef>,
) -> Result<Vec<(String, Value)>, LinkError> {
    let mut bindings = Vec::new();
    for import in &module.imports {
        let namespace = namespaces.get(&import.specifier).ok_or_else(|| LinkError {
            specifier: import.specifier.clone(),
            name: "*".into(),
        })?;
        match &import.bindings {
            ImportBindings::SideEffect => {}
            ImportBindings::Namespace(local) => {
                bindings.push((local.clone(), Value::Object(namespace.clone())));
            }
            ImportBindings::Named(names) => {
                for (imported, local) in names {
                    if !namespace.borrow().has_own(imported) {
                        return Err(LinkError {
                            specifier: import.specifier.clone(),
                            name: imported.clone(),
                        });
                    }
                    bindings.push((local.clone(), namespace.get_or_undefined(imported)));
                }
            }
        }
    }
    Ok(bindings)
}

/// Build a frozen module namespace object from `(name, value)` pairs.
pub fn make_namespace(entries: impl IntoIterator<Item = (String, Value)>) -> ObjectRef {
    let namespace = ObjectRef::new(ObjectClass::Namespace);
    {
        let mut inner = namespace.borrow_mut();
        for (name, value) in entries {
            // A fresh object is extensible and unfrozen.
            let _ = inner.set(&name, value);
        }
        inner.freeze();
    }
    namespace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_module;

    #[test]
    fn named_imports_bind_exported_values() {
        let module = parse_module(r#"import { a, b as c } from "./x.mjs";"#, "m.mjs").unwrap();
        let ns = make_namespace([("a".to_string(), Value::Number(1.0)), ("b".to_string(), Value::Number(2.0))]);
        let namespaces = HashMap::from([("./x.mjs".to_string(), ns)]);

        let bindings = link_imports(&module, &namespaces).unwrap();
        let names: Vec<_> = bindings.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn missing_export_is_reported() {
        let module = parse_module(r#"import { nope } from "./x.mjs";"#, "m.mjs").unwrap();
        let namespaces = HashMap::from([("./x.mjs".to_string(), make_namespace([]))]);

        let err = link_imports(&module, &namespaces).unwrap_err();
        assert_eq!(err.name, "nope");
    }

    #[test]
    fn namespaces_are_frozen() {
        let ns = make_namespace([("a".to_string(), Value::Null)]);
        assert!(ns.is_frozen());
        assert!(ns.set("a", Value::Bool(true)).is_err());
    }
}
