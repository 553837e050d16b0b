//! Lockdown Controller
//!
//! Process-wide, idempotent hardening of the shared intrinsics.
//!
//! The controller is a two-state machine (unlocked → locked) behind a guarded
//! check-and-set on a `once_cell::sync::OnceCell`. The first successful call
//! records its [`LockdownConfiguration`] and freezes the calling thread's
//! intrinsics; every later call is a no-op, even with a different
//! configuration. Threads other than the locking one harden their own
//! intrinsics lazily on first access (see [`crate::runtime::intrinsics::current`]).
//!
//! If an intrinsic cannot be frozen at call time the call fails with
//! [`LockdownError::Unavailable`] and the process stays unlocked. There is no
//! degraded mode.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{errors::LockdownError, runtime::intrinsics};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Verbosity of error stacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorTaming {
    /// Stacks keep only their `Name: message` line.
    Safe,
    #[default]
    Unsafe,
}

/// Where `eval` may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvalTaming {
    /// Only inside compartments.
    #[default]
    SafeEval,
    UnsafeEval,
    NoEval,
}

/// Whether compartments see the host console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleTaming {
    #[default]
    Safe,
    Unsafe,
}

/// How deep intrinsic freezing goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideTaming {
    Min,
    #[default]
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LockdownConfiguration {
    pub error_taming: ErrorTaming,
    pub eval_taming: EvalTaming,
    pub console_taming: ConsoleTaming,
    pub override_taming: OverrideTaming,
}

impl LockdownConfiguration {
    /// Decode a configuration from its JSON form, e.g. the object literal a
    /// generated preamble passes to `lockdown(...)`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, LockdownError> {
        serde_json::from_value(value).map_err(|e| LockdownError::InvalidConfiguration {
            reason: e.to_string(),
        })
    }

    /// The JSON object literal embedded into generated sources.
    pub fn to_json_literal(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// What a call to [`lockdown`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockdownOutcome {
    Applied,
    AlreadyApplied,
}

static LOCKDOWN: OnceCell<LockdownConfiguration> = OnceCell::new();

/// Harden the shared intrinsics. Safe to call any number of times.
pub fn lockdown(config: LockdownConfiguration) -> Result<LockdownOutcome, LockdownError> {
    let mut applied = false;
    let active = LOCKDOWN.get_or_try_init(|| {
        intrinsics::current().harden(config.override_taming)?;
        applied = true;
        Ok::<_, LockdownError>(config.clone())
    })?;

    if applied {
        info!(?active, "lockdown applied");
        return Ok(LockdownOutcome::Applied);
    }

    if *active != config {
        debug!(requested = ?config, ?active, "lockdown already applied; differing configuration ignored");
    } else {
        debug!("lockdown already applied");
    }
    // Harden this thread's set if another thread won the race.
    intrinsics::current();
    Ok(LockdownOutcome::AlreadyApplied)
}

/// The active configuration, once locked.
pub fn configuration() -> Option<&'static LockdownConfiguration> {
    LOCKDOWN.get()
}

pub fn is_locked() -> bool {
    LOCKDOWN.get().is_some()
}

/// Whether error stacks must omit their frames.
pub fn hides_stack_frames() -> bool {
    configuration().is_some_and(|c| c.error_taming == ErrorTaming::Safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_defaults() {
        let config = LockdownConfiguration::from_json(json!({})).unwrap();
        assert_eq!(config, LockdownConfiguration::default());
        assert_eq!(config.error_taming, ErrorTaming::Unsafe);
        assert_eq!(config.eval_taming, EvalTaming::SafeEval);
        assert_eq!(config.console_taming, ConsoleTaming::Safe);
        assert_eq!(config.override_taming, OverrideTaming::Moderate);
    }

    #[test]
    fn knobs_use_camel_case_names() {
        let config = LockdownConfiguration::from_json(json!({
            "errorTaming": "safe",
            "evalTaming": "noEval",
            "overrideTaming": "severe",
        }))
        .unwrap();
        assert_eq!(config.error_taming, ErrorTaming::Safe);
        assert_eq!(config.eval_taming, EvalTaming::NoEval);
        assert_eq!(config.override_taming, OverrideTaming::Severe);
    }

    #[test]
    fn unknown_knob_is_rejected() {
        let err = LockdownConfiguration::from_json(json!({ "mathTaming": "safe" })).unwrap_err();
        assert!(matches!(err, LockdownError::InvalidConfiguration { .. }));
    }

    #[test]
    fn json_literal_round_trips_through_from_json() {
        let config = LockdownConfiguration {
            eval_taming: EvalTaming::UnsafeEval,
            ..Default::default()
        };
        let literal: serde_json::Value = serde_json::from_str(&config.to_json_literal()).unwrap();
        assert_eq!(literal["evalTaming"], "unsafeEval");
        assert_eq!(LockdownConfiguration::from_json(literal).unwrap(), config);
    }
}
