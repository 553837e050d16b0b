//! Diagnostic logging for the `cloister` binary.
//!
//! Logs go to stderr so reporter output on stdout stays machine-readable.
//! The filter comes from `CLOISTER_LOG` when set, otherwise `warn`
//! (`debug` with `--verbose`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const ENV_LOG: &str = "CLOISTER_LOG";

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(verbose: bool) -> bool {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok()
}
