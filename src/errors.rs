//! Cloister Error Handling
//!
//! Every failure mode of the isolation engine is represented here, grouped by
//! the layer that produces it. All errors are `thiserror` enums that also
//! implement `miette::Diagnostic`, so the CLI can render them with codes and
//! help text through a single `miette::Report`.
//!
//! | layer | type | diagnostic codes |
//! |---|---|---|
//! | parser | [`SyntaxError`] | `cloister::syntax` |
//! | lockdown | [`LockdownError`] | `cloister::lockdown::*` |
//! | compartment loader | [`CompartmentError`] | `cloister::compartment::*` |
//! | host loader pipeline | [`HostError`] | `cloister::host::*` |
//! | wrapper generator | [`WrapperError`] | `cloister::wrapper::*` |
//! | process supervisor | [`SupervisorError`] | `cloister::supervisor::*` |
//! | configuration | [`ConfigError`] | `cloister::config::*` |
//!
//! `CompartmentError` and `HostError` may carry a thrown script value and are
//! therefore confined to the interpreter thread. Everything that crosses a
//! thread or reaches `main` is a [`CloisterError`].

use std::{io, path::PathBuf};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::runtime::Thrown;

// ============================================================================
// SYNTAX
// ============================================================================

/// A module failed to parse.
#[derive(Debug, Error, Diagnostic)]
#[error("syntax error in {location}: {message}")]
#[diagnostic(code(cloister::syntax))]
pub struct SyntaxError {
    pub location: String,
    pub message: String,
    #[source_code]
    pub src: NamedSource<String>,
    #[label("here")]
    pub span: SourceSpan,
}

// ============================================================================
// LOCKDOWN
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum LockdownError {
    #[error("cannot harden intrinsic `{name}`: it is in use")]
    #[diagnostic(
        code(cloister::lockdown::unavailable),
        help("apply lockdown before any module code mutates the intrinsics")
    )]
    Unavailable { name: String },

    #[error("invalid lockdown configuration: {reason}")]
    #[diagnostic(code(cloister::lockdown::configuration))]
    InvalidConfiguration { reason: String },
}

// ============================================================================
// COMPARTMENT LOADER
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum CompartmentError {
    #[error("cannot read module `{location}`")]
    #[diagnostic(code(cloister::compartment::read))]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] SyntaxError),

    #[error("cannot load `{specifier}` imported by `{importer}` (import chain: {})", .chain.join(" -> "))]
    #[diagnostic(code(cloister::compartment::resolution))]
    Resolution {
        specifier: String,
        importer: String,
        chain: Vec<String>,
        #[source]
        source: Box<CompartmentError>,
    },

    #[error("import cycle detected: {}", .chain.join(" -> "))]
    #[diagnostic(
        code(cloister::compartment::cycle),
        help("compartment module graphs must be acyclic")
    )]
    Cycle { chain: Vec<String> },

    #[error("`{importer}` imports `{name}` from `{location}`, which does not export it")]
    #[diagnostic(code(cloister::compartment::missing_export))]
    MissingExport {
        location: String,
        name: String,
        importer: String,
    },

    #[error("import hook failed for `{specifier}`: {message}")]
    #[diagnostic(code(cloister::compartment::import_hook))]
    ImportHook { specifier: String, message: String },

    #[error("import hook for `{specifier}` declared further imports: {}", .imports.join(", "))]
    #[diagnostic(
        code(cloister::compartment::nested_imports),
        help("external modules must be exposed as flat, already-resolved namespaces")
    )]
    NestedImports {
        specifier: String,
        imports: Vec<String>,
    },

    #[error("module `{location}` threw during evaluation: {}", .thrown.summary())]
    #[diagnostic(code(cloister::compartment::evaluation))]
    Evaluation { location: String, thrown: Thrown },
}

impl CompartmentError {
    /// The location whose failure aborted the load, following resolution wrappers.
    pub fn failing_location(&self) -> &str {
        match self {
            CompartmentError::Read { location, .. }
            | CompartmentError::MissingExport { location, .. }
            | CompartmentError::Evaluation { location, .. } => location,
            CompartmentError::Parse(err) => &err.location,
            CompartmentError::Resolution { source, .. } => source.failing_location(),
            CompartmentError::Cycle { chain } => chain.last().map(String::as_str).unwrap_or(""),
            CompartmentError::ImportHook { specifier, .. }
            | CompartmentError::NestedImports { specifier, .. } => specifier,
        }
    }
}

// ============================================================================
// HOST LOADER PIPELINE
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum HostError {
    #[error("cannot resolve module `{specifier}`{}", .referrer.as_ref().map(|r| format!(" from `{r}`")).unwrap_or_default())]
    #[diagnostic(code(cloister::host::unknown_module))]
    UnknownModule {
        specifier: String,
        referrer: Option<String>,
    },

    #[error("cannot read module `{location}`")]
    #[diagnostic(code(cloister::host::read))]
    Read {
        location: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] SyntaxError),

    /// A load interceptor matched a location whose source could not be retrieved.
    #[error("intercepted test file `{location}` has no retrievable source")]
    #[diagnostic(
        code(cloister::host::configuration),
        help("check the test-file pattern; matched files must be readable source modules")
    )]
    Configuration {
        location: String,
        #[source]
        source: Option<Box<HostError>>,
    },

    #[error("import cycle detected: {}", .chain.join(" -> "))]
    #[diagnostic(code(cloister::host::cycle))]
    Cycle { chain: Vec<String> },

    #[error("`{importer}` imports `{name}` from `{location}`, which does not export it")]
    #[diagnostic(code(cloister::host::missing_export))]
    MissingExport {
        location: String,
        name: String,
        importer: String,
    },

    #[error("module `{location}` threw during evaluation: {}", .thrown.summary())]
    #[diagnostic(code(cloister::host::evaluation))]
    Evaluation { location: String, thrown: Thrown },
}

// ============================================================================
// WRAPPER GENERATOR
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum WrapperError {
    #[error("cannot create wrapper working directory `{}`", .path.display())]
    #[diagnostic(code(cloister::wrapper::work_dir))]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write wrapper artifact `{}`", .path.display())]
    #[diagnostic(code(cloister::wrapper::io))]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot wrap `{}`: {reason}", .path.display())]
    #[diagnostic(code(cloister::wrapper::original))]
    InvalidOriginal { path: PathBuf, reason: String },
}

// ============================================================================
// PROCESS SUPERVISOR
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum SupervisorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Wrapper(#[from] WrapperError),

    #[error("failed to spawn test process `{}`", .program.display())]
    #[diagnostic(code(cloister::supervisor::spawn))]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("test process exited unsuccessfully ({status})")]
    #[diagnostic(code(cloister::supervisor::process))]
    Process { status: String },

    #[error("in-process test run aborted: {reason}")]
    #[diagnostic(code(cloister::supervisor::runner))]
    Runner { reason: String },

    #[error("cannot decode test summary `{}`", .path.display())]
    #[diagnostic(code(cloister::supervisor::summary))]
    Summary {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot read configuration file `{}`", .path.display())]
    #[diagnostic(code(cloister::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file `{}`", .path.display())]
    #[diagnostic(code(cloister::config::parse))]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {name}={value:?} is invalid, expected {expected}")]
    #[diagnostic(code(cloister::config::env))]
    InvalidEnv {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid test-file pattern `{pattern}`")]
    #[diagnostic(code(cloister::config::pattern))]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

// ============================================================================
// UNIFIED ERROR
// ============================================================================

/// Errors that reach the command line.
#[derive(Debug, Error, Diagnostic)]
pub enum CloisterError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lockdown(#[from] LockdownError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Wrapper(#[from] WrapperError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("{context}")]
    #[diagnostic(code(cloister::io))]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}
