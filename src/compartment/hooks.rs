//! Capabilities the Compartment Loader consumes: reading local module source
//! and importing external (built-in) modules as flat namespaces.

use std::{collections::HashMap, fs, io};

use crate::{
    errors::CompartmentError,
    runtime::{Interpreter, ObjectRef, Value},
};

/// Reads the source text of a local module.
pub trait ReadHook {
    fn read(&self, location: &str) -> io::Result<String>;
}

/// Reads modules from the file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReadHook;

impl ReadHook for FsReadHook {
    fn read(&self, location: &str) -> io::Result<String> {
        fs::read_to_string(location)
    }
}

/// Serves module sources from memory, keyed by location.
#[derive(Debug, Clone, Default)]
pub struct MemoryReadHook {
    sources: HashMap<String, String>,
}

impl MemoryReadHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, location: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(location.into(), source.into());
        self
    }
}

impl ReadHook for MemoryReadHook {
    fn read(&self, location: &str) -> io::Result<String> {
        self.sources
            .get(location)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no module at {location}")))
    }
}

/// Populates an external module's export object.
pub type ExecuteFn = Box<dyn FnOnce(&ObjectRef)>;

/// What an [`ImportHook`] hands back for an external specifier.
///
/// `imports` must be empty: external modules are already-resolved, flat
/// namespaces and are never decomposed further.
pub struct ImportHookResult {
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub execute: ExecuteFn,
}

impl ImportHookResult {
    /// A flat result exporting `entries` as-is.
    pub fn from_entries(entries: Vec<(String, Value)>) -> Self {
        let exports = entries.iter().map(|(name, _)| name.clone()).collect();
        Self {
            imports: Vec::new(),
            exports,
            execute: Box::new(move |target| {
                for (name, value) in entries {
                    // The export object is fresh and extensible.
                    let _ = target.set(&name, value);
                }
            }),
        }
    }
}

/// Resolves non-local specifiers.
pub trait ImportHook {
    fn import(&self, specifier: &str) -> Result<ImportHookResult, CompartmentError>;
}

/// Exposes the host's built-in modules (`cloister:*`) to compartments.
#[derive(Clone, Default)]
pub struct BuiltinImportHook {
    modules: HashMap<String, ObjectRef>,
}

impl BuiltinImportHook {
    pub fn new(modules: HashMap<String, ObjectRef>) -> Self {
        Self { modules }
    }

    /// Snapshot of the built-ins registered on `interp`.
    pub fn from_interpreter(interp: &Interpreter) -> Self {
        Self::new(interp.builtins().clone())
    }
}

impl ImportHook for BuiltinImportHook {
    fn import(&self, specifier: &str) -> Result<ImportHookResult, CompartmentError> {
        let namespace = self.modules.get(specifier).ok_or_else(|| CompartmentError::ImportHook {
            specifier: specifier.to_string(),
            message: "no such built-in module".into(),
        })?;
        let entries = namespace.borrow().entries();
        Ok(ImportHookResult::from_entries(entries))
    }
}
