//! Run configuration via `cloister.toml`, `CLOISTER_*` environment flags and
//! command-line overrides, in increasing order of precedence.
//!
//! ```toml
//! [run]
//! mode = "auto"          # auto | wrapper | loader
//! reporter = "spec"      # spec | tap | dot | junit
//! work_dir = ".cloister"
//! prefix = "cloister"
//! loader_hooks = true
//!
//! [isolation]
//! strategy = "full"      # simple | full
//! debug = false
//! pattern = "\\.test\\.mjs$"
//!
//! [lockdown]
//! errorTaming = "unsafe"
//! evalTaming = "safeEval"
//! consoleTaming = "safe"
//! overrideTaming = "moderate"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    errors::ConfigError,
    interceptor::{Strategy, TestPattern, TransformOptions},
    lockdown::LockdownConfiguration,
    runner::ReporterKind,
    supervisor::{Mode, SupervisorOptions},
    wrapper::{WrapperOptions, DEFAULT_PREFIX, DEFAULT_WORK_DIR},
};

/// Config file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "cloister.toml";

/// Set in a spawned child to install the load interceptor at startup.
pub const ENV_PRELOAD: &str = "CLOISTER_PRELOAD";
pub const ENV_ISOLATION: &str = "CLOISTER_ISOLATION";
pub const ENV_DEBUG: &str = "CLOISTER_DEBUG";
pub const ENV_PATTERN: &str = "CLOISTER_PATTERN";
pub const ENV_REPORTER: &str = "CLOISTER_REPORTER";
pub const ENV_SUMMARY_FILE: &str = "CLOISTER_SUMMARY_FILE";
pub const ENV_MODE: &str = "CLOISTER_MODE";
pub const ENV_WORK_DIR: &str = "CLOISTER_WORK_DIR";

// ============================================================================
// FILE FORMAT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub run: RunSection,
    pub isolation: IsolationSection,
    pub lockdown: LockdownConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub mode: Option<Mode>,
    pub reporter: Option<ReporterKind>,
    pub work_dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub loader_hooks: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolationSection {
    pub strategy: Option<Strategy>,
    pub debug: Option<bool>,
    pub pattern: Option<String>,
}

impl FileConfig {
    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path`, or `cloister.toml` in the current directory when it
    /// exists. An explicit path must exist.
    pub fn discover(path: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(CONFIG_FILE_NAME);
                if !default.is_file() {
                    return Ok((Self::default(), None));
                }
                default
            }
        };
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "configuration file loaded");
        Ok((Self::from_toml(&path, &text)?, Some(path)))
    }
}

// ============================================================================
// RESOLVED CONFIGURATION
// ============================================================================

/// Command-line values; `None` leaves the lower layers in charge.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub strategy: Option<Strategy>,
    pub reporter: Option<ReporterKind>,
    pub work_dir: Option<PathBuf>,
    pub debug: Option<bool>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub reporter: ReporterKind,
    pub work_dir: PathBuf,
    pub prefix: String,
    pub loader_hooks: bool,
    pub strategy: Strategy,
    pub debug: bool,
    pub pattern: TestPattern,
    pub lockdown: LockdownConfiguration,
    /// The file the configuration came from, if any.
    pub file: Option<PathBuf>,
}

impl Config {
    /// Layer the config file, the process environment and `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let (file, source) = FileConfig::discover(path)?;
        let mut config = Self::resolve(file, |name| std::env::var(name).ok(), overrides)?;
        config.file = source;
        Ok(config)
    }

    /// Layer explicit inputs. `env` looks up one variable.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let env_mode = env_choice(&env, ENV_MODE, "auto | wrapper | loader", Mode::parse)?;
        let env_reporter = env_choice(&env, ENV_REPORTER, "spec | tap | dot | junit", ReporterKind::parse)?;
        let env_strategy = env_choice(&env, ENV_ISOLATION, "simple | full", Strategy::parse)?;
        let env_debug = env_choice(&env, ENV_DEBUG, "1 | 0 | true | false", parse_flag)?;
        let env_pattern = env(ENV_PATTERN).filter(|p| !p.is_empty());
        let env_work_dir = env(ENV_WORK_DIR).filter(|p| !p.is_empty()).map(PathBuf::from);

        let pattern = match overrides.pattern.clone().or(env_pattern).or(file.isolation.pattern) {
            Some(pattern) => TestPattern::new(&pattern)?,
            None => TestPattern::default(),
        };

        Ok(Self {
            mode: overrides.mode.or(env_mode).or(file.run.mode).unwrap_or_default(),
            reporter: overrides.reporter.or(env_reporter).or(file.run.reporter).unwrap_or_default(),
            work_dir: overrides
                .work_dir
                .clone()
                .or(env_work_dir)
                .or(file.run.work_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            prefix: file.run.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            loader_hooks: file.run.loader_hooks.unwrap_or(true),
            strategy: overrides.strategy.or(env_strategy).or(file.isolation.strategy).unwrap_or_default(),
            debug: overrides.debug.or(env_debug).or(file.isolation.debug).unwrap_or(false),
            pattern,
            lockdown: file.lockdown,
            file: None,
        })
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            debug: self.debug,
            lockdown: self.lockdown.clone(),
            pattern: self.pattern.clone(),
            strategy: self.strategy,
        }
    }

    pub fn wrapper_options(&self) -> WrapperOptions {
        WrapperOptions {
            work_dir: self.work_dir.clone(),
            prefix: self.prefix.clone(),
            lockdown: self.lockdown.clone(),
        }
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            mode: self.mode,
            reporter: self.reporter,
            loader_hooks: self.loader_hooks,
            wrapper: self.wrapper_options(),
            transform: self.transform_options(),
            program: None,
            config_file: self.file.clone(),
        }
    }
}

/// Whether this process was started to run with the load interceptor.
pub fn preload_requested() -> bool {
    std::env::var(ENV_PRELOAD).ok().and_then(|v| parse_flag(&v)).unwrap_or(false)
}

/// Where a spawned child should write its summary, if anywhere.
pub fn summary_file() -> Option<PathBuf> {
    std::env::var_os(ENV_SUMMARY_FILE)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn env_choice<T>(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    match env(name) {
        None => Ok(None),
        Some(value) => parse(&value)
            .map(Some)
            .ok_or(ConfigError::InvalidEnv { name, value, expected }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockdown::{EvalTaming, OverrideTaming};
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    const FILE: &str = r#"
        [run]
        mode = "wrapper"
        reporter = "tap"
        prefix = "iso"

        [isolation]
        strategy = "simple"
        pattern = '\.check\.mjs$'

        [lockdown]
        evalTaming = "noEval"
        overrideTaming = "severe"
    "#;

    #[test]
    fn file_values_apply_over_defaults() {
        let file = FileConfig::from_toml(Path::new("cloister.toml"), FILE).unwrap();
        let config = Config::resolve(file, env_of(&[]), &Overrides::default()).unwrap();
        assert_eq!(config.mode, Mode::Wrapper);
        assert_eq!(config.reporter, ReporterKind::Tap);
        assert_eq!(config.prefix, "iso");
        assert_eq!(config.strategy, Strategy::Simple);
        assert!(config.pattern.matches("a.check.mjs"));
        assert_eq!(config.lockdown.eval_taming, EvalTaming::NoEval);
        assert_eq!(config.lockdown.override_taming, OverrideTaming::Severe);
        assert_eq!(config.work_dir, PathBuf::from(".cloister"));
    }

    #[test]
    fn env_beats_file_and_cli_beats_env() {
        let file = FileConfig::from_toml(Path::new("cloister.toml"), FILE).unwrap();
        let env = env_of(&[(ENV_REPORTER, "dot"), (ENV_ISOLATION, "full"), (ENV_DEBUG, "1")]);
        let overrides = Overrides {
            reporter: Some(ReporterKind::Junit),
            ..Default::default()
        };
        let config = Config::resolve(file, env, &overrides).unwrap();
        assert_eq!(config.reporter, ReporterKind::Junit);
        assert_eq!(config.strategy, Strategy::Full);
        assert!(config.debug);
    }

    #[test]
    fn invalid_env_flag_is_reported() {
        let err = Config::resolve(FileConfig::default(), env_of(&[(ENV_ISOLATION, "partial")]), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: ENV_ISOLATION, .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = FileConfig::from_toml(Path::new("c.toml"), "[run]\nthreads = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
