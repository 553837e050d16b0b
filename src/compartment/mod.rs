//! Compartment Loader
//!
//! Builds and evaluates a module dependency graph under an isolated,
//! capability-scoped global object.
//!
//! ## Phases
//!
//! 1. **Resolution**: starting at the entry, read and parse every local module
//!    reachable through imports. Local specifiers (`./`, `../`, `/`) resolve
//!    lexically against the importer's directory; everything else goes to the
//!    import hook and becomes a frozen flat namespace. Descriptors are memoized
//!    by location, and a location that reappears on the current import chain is
//!    a cycle.
//! 2. **Evaluation**: depth-first over the import DAG in source order,
//!    dependencies before dependents, each module exactly once. The first
//!    thrown value aborts the load.
//!
//! ## Isolation
//!
//! Every module in the graph shares one compartment global: the shared
//! intrinsics plus the endowed globals, non-extensible. Nothing of the host
//! global is reachable unless it was explicitly endowed.

pub mod hooks;

use std::{collections::HashMap, rc::Rc};

use tracing::{debug, trace};

use crate::{
    errors::CompartmentError,
    runtime::{intrinsics, link_imports, module::make_namespace, Interpreter, ModuleSource, ObjectRef, Realm, Value},
    syntax::{parse_module, Module},
};

pub use hooks::{
    BuiltinImportHook, FsReadHook, ImportHook, ImportHookResult, MemoryReadHook, ReadHook,
};

/// Capabilities and endowments for one compartment.
pub struct LoadOptions {
    pub globals: Vec<(String, Value)>,
    pub import_hook: Box<dyn ImportHook>,
    pub read_hook: Box<dyn ReadHook>,
}

impl LoadOptions {
    pub fn new(import_hook: Box<dyn ImportHook>, read_hook: Box<dyn ReadHook>) -> Self {
        Self {
            globals: Vec::new(),
            import_hook,
            read_hook,
        }
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.push((name.into(), value));
        self
    }
}

/// A resolved, parsed module. Immutable once created.
struct ModuleDescriptor {
    source: Rc<ModuleSource>,
    module: Module,
    dependencies: Vec<(String, Dependency)>,
}

enum Dependency {
    Local(String),
    External(ObjectRef),
}

/// An isolated evaluation scope with a fixed set of global bindings and a
/// private module registry.
pub struct Compartment {
    global: ObjectRef,
    import_hook: Box<dyn ImportHook>,
    read_hook: Box<dyn ReadHook>,
    descriptors: HashMap<String, Rc<ModuleDescriptor>>,
    externals: HashMap<String, ObjectRef>,
    namespaces: HashMap<String, ObjectRef>,
}

impl Compartment {
    /// Load `entry` and everything it imports in a fresh compartment,
    /// returning the entry's frozen namespace.
    pub fn load(
        interp: &mut Interpreter,
        entry: &str,
        options: LoadOptions,
    ) -> Result<ObjectRef, CompartmentError> {
        let entry = normalize(entry);
        debug!(%entry, endowments = options.globals.len(), "loading compartment");

        let mut compartment = Compartment::new(options);
        compartment.resolve(&entry, &mut Vec::new())?;
        compartment.evaluate(interp, &entry)
    }

    fn new(options: LoadOptions) -> Self {
        Self {
            global: intrinsics::compartment_global(&options.globals),
            import_hook: options.import_hook,
            read_hook: options.read_hook,
            descriptors: HashMap::new(),
            externals: HashMap::new(),
            namespaces: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Phase 1: resolution
    // ------------------------------------------------------------------------

    fn resolve(&mut self, location: &str, chain: &mut Vec<String>) -> Result<(), CompartmentError> {
        if chain.iter().any(|l| l == location) {
            let mut cycle = chain.clone();
            cycle.push(location.to_string());
            return Err(CompartmentError::Cycle { chain: cycle });
        }
        if self.descriptors.contains_key(location) {
            return Ok(());
        }

        let text = self
            .read_hook
            .read(location)
            .map_err(|source| CompartmentError::Read {
                location: location.to_string(),
                source,
            })?;
        let module = parse_module(&text, location)?;
        trace!(%location, imports = module.imports.len(), "resolved module");

        chain.push(location.to_string());
        let mut dependencies = Vec::new();
        for specifier in module.specifiers() {
            let dependency = self
                .resolve_specifier(location, &specifier, chain)
                .map_err(|source| CompartmentError::Resolution {
                    specifier: specifier.clone(),
                    importer: location.to_string(),
                    chain: chain.clone(),
                    source: Box::new(source),
                })?;
            dependencies.push((specifier, dependency));
        }
        chain.pop();

        let descriptor = ModuleDescriptor {
            source: Rc::new(ModuleSource::new(location, text)),
            module,
            dependencies,
        };
        self.descriptors.insert(location.to_string(), Rc::new(descriptor));
        Ok(())
    }

    fn resolve_specifier(
        &mut self,
        importer: &str,
        specifier: &str,
        chain: &mut Vec<String>,
    ) -> Result<Dependency, CompartmentError> {
        if is_local(specifier) {
            let location = resolve_local(importer, specifier);
            self.resolve(&location, chain)?;
            return Ok(Dependency::Local(location));
        }
        self.import_external(specifier).map(Dependency::External)
    }

    fn import_external(&mut self, specifier: &str) -> Result<ObjectRef, CompartmentError> {
        if let Some(namespace) = self.externals.get(specifier) {
            return Ok(namespace.clone());
        }

        let result = self.import_hook.import(specifier)?;
        if !result.imports.is_empty() {
            return Err(CompartmentError::NestedImports {
                specifier: specifier.to_string(),
                imports: result.imports,
            });
        }

        let exports = ObjectRef::ordinary();
        for name in &result.exports {
            let _ = exports.set(name, Value::Undefined);
        }
        (result.execute)(&exports);
        let namespace = make_namespace(
            result
                .exports
                .iter()
                .map(|name| (name.clone(), exports.get_or_undefined(name))),
        );

        trace!(%specifier, exports = result.exports.len(), "imported external module");
        self.externals.insert(specifier.to_string(), namespace.clone());
        Ok(namespace)
    }

    // ------------------------------------------------------------------------
    // Phase 2: evaluation
    // ------------------------------------------------------------------------

    fn evaluate(&mut self, interp: &mut Interpreter, location: &str) -> Result<ObjectRef, CompartmentError> {
        if let Some(namespace) = self.namespaces.get(location) {
            return Ok(namespace.clone());
        }
        let Some(descriptor) = self.descriptors.get(location).cloned() else {
            // Every evaluated location was registered during resolution.
            return Err(CompartmentError::Cycle {
                chain: vec![location.to_string()],
            });
        };

        let mut namespaces = HashMap::new();
        let mut locations = HashMap::new();
        for (specifier, dependency) in &descriptor.dependencies {
            let namespace = match dependency {
                Dependency::Local(dep) => {
                    locations.insert(specifier.clone(), dep.clone());
                    self.evaluate(interp, dep)?
                }
                Dependency::External(namespace) => namespace.clone(),
            };
            namespaces.insert(specifier.clone(), namespace);
        }

        let bindings = link_imports(&descriptor.module, &namespaces).map_err(|err| {
            CompartmentError::MissingExport {
                location: locations.get(&err.specifier).cloned().unwrap_or(err.specifier),
                name: err.name,
                importer: location.to_string(),
            }
        })?;

        trace!(%location, "evaluating module in compartment");
        let namespace = interp
            .evaluate_module(
                &descriptor.module,
                descriptor.source.clone(),
                bindings,
                self.global.clone(),
                Realm::Compartment,
            )
            .map_err(|thrown| CompartmentError::Evaluation {
                location: location.to_string(),
                thrown,
            })?;

        self.namespaces.insert(location.to_string(), namespace.clone());
        Ok(namespace)
    }
}

// ============================================================================
// SPECIFIERS
// ============================================================================

/// Local specifiers are resolved against the importer; everything else is external.
pub fn is_local(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Resolve a local specifier lexically against the importer's directory.
pub fn resolve_local(importer: &str, specifier: &str) -> String {
    if specifier.starts_with('/') {
        return normalize(specifier);
    }
    let directory = importer.rsplit_once('/').map_or("", |(dir, _)| dir);
    normalize(&format!("{directory}/{specifier}"))
}

/// Collapse `.` and `..` segments and duplicate separators.
fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specifiers_are_classified() {
        assert!(is_local("./a.mjs"));
        assert!(is_local("../a.mjs"));
        assert!(is_local("/abs/a.mjs"));
        assert!(!is_local("cloister:test"));
        assert!(!is_local("lodash"));
    }

    #[test]
    fn local_specifiers_resolve_lexically() {
        assert_eq!(resolve_local("/p/test/top.mjs", "./mid.mjs"), "/p/test/mid.mjs");
        assert_eq!(resolve_local("/p/test/top.mjs", "../lib/./base.mjs"), "/p/lib/base.mjs");
        assert_eq!(resolve_local("/p/test/top.mjs", "/q//x.mjs"), "/q/x.mjs");
        assert_eq!(resolve_local("rel/top.mjs", "../../up.mjs"), "../up.mjs");
    }
}
