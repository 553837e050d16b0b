//! Load Interceptor
//!
//! Loader hooks that rewrite test-file sources as the host loads them.
//! `resolve` always defers to `next`; `load` replaces the text of every
//! location matching the test-file pattern with a generated isolation
//! program (see [`templates`]). Other locations pass through untouched.
//!
//! The [`TransformOptions`] are fixed when the hooks are installed and read
//! on every intercepted load.

pub mod pattern;
pub mod templates;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::{
    errors::HostError,
    host::pipeline::{self, LoadContext, LoadedSource, LoaderHooks, ModuleFormat, NextLoad},
    lockdown::LockdownConfiguration,
};

pub use pattern::TestPattern;
pub use templates::Strategy;

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Log every generated source at `debug`.
    pub debug: bool,
    pub lockdown: LockdownConfiguration,
    pub pattern: TestPattern,
    pub strategy: Strategy,
}

static OPTIONS: OnceCell<Arc<TransformOptions>> = OnceCell::new();

/// Install the interceptor into the process-wide loader registry. Only the
/// first call registers hooks; later calls return `false` and keep the
/// original options.
pub fn install(options: TransformOptions) -> bool {
    let mut installed = false;
    let active = OPTIONS.get_or_init(|| {
        installed = true;
        Arc::new(options)
    });
    if installed {
        pipeline::register(Arc::new(InterceptorHooks::new(active.clone())));
        debug!(strategy = %active.strategy, pattern = active.pattern.as_str(), "load interceptor installed");
    } else {
        debug!("load interceptor already installed");
    }
    installed
}

/// The options of the installed interceptor.
pub fn options() -> Option<&'static TransformOptions> {
    OPTIONS.get().map(Arc::as_ref)
}

pub struct InterceptorHooks {
    options: Arc<TransformOptions>,
}

impl InterceptorHooks {
    pub fn new(options: Arc<TransformOptions>) -> Self {
        Self { options }
    }

    /// The rewritten text for `url`, or `None` when it is not a test file.
    pub fn transform(&self, url: &str, original: &str) -> Option<String> {
        if !self.options.pattern.matches(url) {
            return None;
        }
        Some(templates::render(
            self.options.strategy,
            url,
            original,
            &self.options.lockdown,
        ))
    }
}

impl LoaderHooks for InterceptorHooks {
    fn load(&self, url: &str, context: &LoadContext, next: NextLoad<'_>) -> Result<LoadedSource, HostError> {
        if context.format != ModuleFormat::Module || !self.options.pattern.matches(url) {
            trace!(%url, "not a test file, passing through");
            return next(url, context);
        }

        let loaded = next(url, context).map_err(|err| HostError::Configuration {
            location: url.to_string(),
            source: Some(Box::new(err)),
        })?;
        let original = match loaded.source {
            Some(text) if !text.is_empty() => text,
            _ => {
                return Err(HostError::Configuration {
                    location: url.to_string(),
                    source: None,
                })
            }
        };

        debug!(%url, strategy = %self.options.strategy, "intercepting test module");
        let text = templates::render(self.options.strategy, url, &original, &self.options.lockdown);
        if self.options.debug {
            debug!(%url, source = %text, "generated isolation source");
        }
        Ok(LoadedSource {
            source: Some(text),
            format: ModuleFormat::Module,
        })
    }
}
