//! The host's two-point module loading pipeline.
//!
//! Every module the host imports passes through `resolve(specifier, context)`
//! and then `load(url, context)`. Registered [`LoaderHooks`] wrap those two
//! points: each hook receives a `next` continuation for the hooks registered
//! before it, ending in the default file-system implementation. The hook
//! registered last runs first.

use std::{
    fs,
    sync::{Arc, RwLock},
};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::{compartment::resolve_local, errors::HostError};

/// Scheme prefix of built-in modules.
pub const BUILTIN_SCHEME: &str = "cloister:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    /// A source module read from `url`.
    Module,
    /// A host-provided module; it has no source text.
    Builtin,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Location of the importing module; `None` for entry points.
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub url: String,
    pub format: ModuleFormat,
}

#[derive(Debug, Clone)]
pub struct LoadContext {
    pub format: ModuleFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    pub source: Option<String>,
    pub format: ModuleFormat,
}

pub type NextResolve<'a> = &'a dyn Fn(&str, &ResolveContext) -> Result<Resolved, HostError>;
pub type NextLoad<'a> = &'a dyn Fn(&str, &LoadContext) -> Result<LoadedSource, HostError>;

/// A customization of the host's resolve and load steps. Both default to
/// deferring to `next`.
pub trait LoaderHooks: Send + Sync {
    fn resolve(
        &self,
        specifier: &str,
        context: &ResolveContext,
        next: NextResolve<'_>,
    ) -> Result<Resolved, HostError> {
        next(specifier, context)
    }

    fn load(&self, url: &str, context: &LoadContext, next: NextLoad<'_>) -> Result<LoadedSource, HostError> {
        next(url, context)
    }
}

// ============================================================================
// REGISTRATION
// ============================================================================

static REGISTERED: Lazy<RwLock<Vec<Arc<dyn LoaderHooks>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register loader hooks for every host created afterwards in this process.
pub fn register(hooks: Arc<dyn LoaderHooks>) {
    let mut registered = REGISTERED.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    registered.push(hooks);
    debug!(count = registered.len(), "loader hooks registered");
}

// ============================================================================
// CHAIN
// ============================================================================

/// An ordered stack of loader hooks over the default implementation.
#[derive(Clone, Default)]
pub struct LoaderChain {
    hooks: Vec<Arc<dyn LoaderHooks>>,
}

impl LoaderChain {
    pub fn new(hooks: Vec<Arc<dyn LoaderHooks>>) -> Self {
        Self { hooks }
    }

    /// The hooks registered process-wide so far.
    pub fn from_registry() -> Self {
        let registered = REGISTERED.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::new(registered.clone())
    }

    pub fn push(&mut self, hooks: Arc<dyn LoaderHooks>) {
        self.hooks.push(hooks);
    }

    pub fn resolve(&self, specifier: &str, context: &ResolveContext) -> Result<Resolved, HostError> {
        self.resolve_at(self.hooks.len(), specifier, context)
    }

    pub fn load(&self, url: &str, context: &LoadContext) -> Result<LoadedSource, HostError> {
        self.load_at(self.hooks.len(), url, context)
    }

    fn resolve_at(&self, depth: usize, specifier: &str, context: &ResolveContext) -> Result<Resolved, HostError> {
        match depth.checked_sub(1) {
            None => default_resolve(specifier, context),
            Some(index) => {
                let next = |s: &str, c: &ResolveContext| self.resolve_at(index, s, c);
                self.hooks[index].resolve(specifier, context, &next)
            }
        }
    }

    fn load_at(&self, depth: usize, url: &str, context: &LoadContext) -> Result<LoadedSource, HostError> {
        match depth.checked_sub(1) {
            None => default_load(url, context),
            Some(index) => {
                let next = |u: &str, c: &LoadContext| self.load_at(index, u, c);
                self.hooks[index].load(url, context, &next)
            }
        }
    }
}

// ============================================================================
// DEFAULTS
// ============================================================================

pub fn default_resolve(specifier: &str, context: &ResolveContext) -> Result<Resolved, HostError> {
    if specifier.starts_with(BUILTIN_SCHEME) {
        return Ok(Resolved {
            url: specifier.to_string(),
            format: ModuleFormat::Builtin,
        });
    }

    let url = match (&context.referrer, specifier) {
        (_, s) if s.starts_with('/') => resolve_local("/", s),
        (Some(referrer), s) if s.starts_with("./") || s.starts_with("../") => resolve_local(referrer, s),
        (None, s) if s.starts_with("./") || s.starts_with("../") => {
            let cwd = std::env::current_dir().map_err(|source| HostError::Read {
                location: specifier.to_string(),
                source,
            })?;
            resolve_local(&format!("{}/", cwd.to_string_lossy()), s)
        }
        _ => {
            return Err(HostError::UnknownModule {
                specifier: specifier.to_string(),
                referrer: context.referrer.clone(),
            })
        }
    };
    Ok(Resolved {
        url,
        format: ModuleFormat::Module,
    })
}

pub fn default_load(url: &str, context: &LoadContext) -> Result<LoadedSource, HostError> {
    let source = match context.format {
        ModuleFormat::Builtin => None,
        ModuleFormat::Module => Some(fs::read_to_string(url).map_err(|source| HostError::Read {
            location: url.to_string(),
            source,
        })?),
    };
    Ok(LoadedSource {
        source,
        format: context.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagging(&'static str);

    impl LoaderHooks for Tagging {
        fn load(&self, url: &str, context: &LoadContext, next: NextLoad<'_>) -> Result<LoadedSource, HostError> {
            let mut loaded = next(url, context)?;
            loaded.source = loaded.source.map(|s| format!("{}{s}", self.0));
            Ok(loaded)
        }
    }

    #[test]
    fn builtins_and_relative_specifiers_resolve() {
        let builtin = default_resolve("cloister:test", &ResolveContext::default()).unwrap();
        assert_eq!(builtin.format, ModuleFormat::Builtin);

        let context = ResolveContext {
            referrer: Some("/work/test/a.mjs".into()),
        };
        let local = default_resolve("../lib/b.mjs", &context).unwrap();
        assert_eq!(local.url, "/work/lib/b.mjs");

        let bare = default_resolve("left-pad", &context).unwrap_err();
        assert!(matches!(bare, HostError::UnknownModule { .. }));
    }

    #[test]
    fn last_registered_hook_runs_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.mjs");
        fs::write(&path, "x").unwrap();

        let chain = LoaderChain::new(vec![Arc::new(Tagging("a")), Arc::new(Tagging("b"))]);
        let loaded = chain
            .load(
                &path.to_string_lossy(),
                &LoadContext {
                    format: ModuleFormat::Module,
                },
            )
            .unwrap();
        // "a" wraps the file read; "b" wraps "a".
        assert_eq!(loaded.source.as_deref(), Some("bax"));
    }
}
