//! The host realm.
//!
//! Test files are loaded here, outside any compartment: they share the
//! interpreter's extensible host global object and a module cache keyed by
//! resolved location. Each load runs through the [`LoaderChain`], which is
//! where the load interceptor rewrites test-file sources.

pub mod builtins;
pub mod pipeline;

use std::{collections::HashMap, fs, path::Path, rc::Rc};

use tracing::{debug, trace};

use crate::{
    errors::HostError,
    runtime::{link_imports, Interpreter, ModuleSource, ObjectRef, Realm},
    syntax::parse_module,
    wrapper::sourcemap::{self, SourceMap},
};

pub use pipeline::{
    LoadContext, LoadedSource, LoaderChain, LoaderHooks, ModuleFormat, ResolveContext, Resolved,
};

pub struct Host {
    chain: LoaderChain,
    cache: HashMap<String, ObjectRef>,
    loading: Vec<String>,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    /// A host whose pipeline runs every hook registered so far.
    pub fn new() -> Self {
        Self::with_chain(LoaderChain::from_registry())
    }

    pub fn with_chain(chain: LoaderChain) -> Self {
        Self {
            chain,
            cache: HashMap::new(),
            loading: Vec::new(),
        }
    }

    /// Import `specifier` (and, transitively, its dependencies) into the host
    /// realm, returning its namespace. Modules are evaluated once per host.
    pub fn import(
        &mut self,
        interp: &mut Interpreter,
        specifier: &str,
        referrer: Option<&str>,
    ) -> Result<ObjectRef, HostError> {
        let context = ResolveContext {
            referrer: referrer.map(str::to_string),
        };
        let resolved = self.chain.resolve(specifier, &context)?;
        let url = resolved.url;

        if let Some(namespace) = self.cache.get(&url) {
            return Ok(namespace.clone());
        }
        if self.loading.contains(&url) {
            let mut chain = self.loading.clone();
            chain.push(url);
            return Err(HostError::Cycle { chain });
        }

        let loaded = self.chain.load(&url, &LoadContext { format: resolved.format })?;
        let namespace = match (loaded.format, loaded.source) {
            (ModuleFormat::Builtin, _) => interp.builtin(&url).ok_or_else(|| HostError::UnknownModule {
                specifier: specifier.to_string(),
                referrer: context.referrer.clone(),
            })?,
            (ModuleFormat::Module, Some(text)) => {
                self.loading.push(url.clone());
                let result = self.evaluate(interp, &url, text);
                self.loading.pop();
                result?
            }
            (ModuleFormat::Module, None) => {
                return Err(HostError::Read {
                    location: url.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "loader returned no source"),
                })
            }
        };

        self.cache.insert(url, namespace.clone());
        Ok(namespace)
    }

    fn evaluate(&mut self, interp: &mut Interpreter, url: &str, text: String) -> Result<ObjectRef, HostError> {
        let module = parse_module(&text, url)?;
        register_source_map(interp, url, &text);

        let mut namespaces = HashMap::new();
        let mut locations = HashMap::new();
        for specifier in module.specifiers() {
            let namespace = self.import(interp, &specifier, Some(url))?;
            if let Ok(resolved) = self.chain.resolve(
                &specifier,
                &ResolveContext {
                    referrer: Some(url.to_string()),
                },
            ) {
                locations.insert(specifier.clone(), resolved.url);
            }
            namespaces.insert(specifier, namespace);
        }

        let bindings = link_imports(&module, &namespaces).map_err(|err| HostError::MissingExport {
            location: locations.get(&err.specifier).cloned().unwrap_or(err.specifier),
            name: err.name,
            importer: url.to_string(),
        })?;

        trace!(%url, "evaluating host module");
        let global = interp.host_global().clone();
        interp
            .evaluate_module(&module, Rc::new(ModuleSource::new(url, text)), bindings, global, Realm::Host)
            .map_err(|thrown| HostError::Evaluation {
                location: url.to_string(),
                thrown,
            })
    }
}

/// Register the source map named by a `//# sourceMappingURL=` trailer, if any.
/// A missing or malformed map only loses position translation.
fn register_source_map(interp: &mut Interpreter, url: &str, text: &str) {
    let Some(name) = sourcemap::trailer_url(text) else {
        return;
    };
    let map_path = Path::new(url).parent().map_or_else(|| Path::new(name).to_path_buf(), |dir| dir.join(name));
    match fs::read_to_string(&map_path).map(|json| SourceMap::from_json(&json)) {
        Ok(Ok(map)) => {
            debug!(%url, map = %map_path.display(), "source map registered");
            interp.register_source_map(url, map);
        }
        Ok(Err(err)) => debug!(%url, %err, "ignoring malformed source map"),
        Err(err) => debug!(%url, %err, "ignoring unreadable source map"),
    }
}
