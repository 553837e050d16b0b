//! Cloister runs test modules in isolation: every test file is loaded into a
//! fresh compartment over hardened, shared intrinsics, so no file can leak
//! state into another through globals or mutated built-ins.

pub use crate::errors::{CloisterError, CompartmentError, HostError};

pub mod cli;
pub mod compartment;
pub mod config;
pub mod errors;
pub mod host;
pub mod interceptor;
pub mod lockdown;
pub mod logging;
pub mod runner;
pub mod runtime;
pub mod supervisor;
pub mod syntax;
pub mod wrapper;
