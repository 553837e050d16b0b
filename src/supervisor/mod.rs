//! Process Supervisor
//!
//! Runs a batch of test files by one of two strategies and reduces either to
//! a single `Result<Summary, SupervisorError>`:
//!
//! - **Wrapper mode** generates a wrapper batch, runs the host test runner
//!   over the wrappers on a blocking worker thread, then cleans the batch up
//!   whatever the outcome.
//! - **Loader mode** spawns the current executable (`cloister exec`) with the
//!   load interceptor preloaded and its options passed as discrete
//!   `CLOISTER_*` environment flags. Real counts come back through a JSON
//!   summary file; a child that never wrote one is judged by its exit status.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    config::{ENV_DEBUG, ENV_ISOLATION, ENV_PATTERN, ENV_PRELOAD, ENV_REPORTER, ENV_SUMMARY_FILE},
    errors::SupervisorError,
    interceptor::TransformOptions,
    runner::{self, ReporterKind, Runner, Summary},
    wrapper::{WrapperGenerator, WrapperOptions},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Loader mode when loader hooks are enabled and the child executable can
    /// be found, wrapper mode otherwise.
    #[default]
    Auto,
    Wrapper,
    Loader,
}

impl Mode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Mode::Auto),
            "wrapper" => Some(Mode::Wrapper),
            "loader" => Some(Mode::Loader),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Auto => "auto",
            Mode::Wrapper => "wrapper",
            Mode::Loader => "loader",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub mode: Mode,
    pub reporter: ReporterKind,
    /// Whether loader hooks may be used at all; `false` forces wrapper mode
    /// under `auto`.
    pub loader_hooks: bool,
    pub wrapper: WrapperOptions,
    pub transform: TransformOptions,
    /// Executable spawned in loader mode; the current one when `None`.
    pub program: Option<PathBuf>,
    /// Configuration file forwarded to the child.
    pub config_file: Option<PathBuf>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Auto,
            reporter: ReporterKind::Spec,
            loader_hooks: true,
            wrapper: WrapperOptions::default(),
            transform: TransformOptions::default(),
            program: None,
            config_file: None,
        }
    }
}

impl SupervisorOptions {
    /// The concrete strategy `auto` stands for on this host.
    pub fn effective_mode(&self) -> Mode {
        match self.mode {
            Mode::Auto if self.loader_hooks && self.loader_program().is_some() => Mode::Loader,
            Mode::Auto => Mode::Wrapper,
            explicit => explicit,
        }
    }

    /// The executable loader mode would spawn, if it can be found.
    pub fn loader_program(&self) -> Option<PathBuf> {
        match &self.program {
            Some(program) => resolve_program(program),
            None => std::env::current_exe().ok(),
        }
    }
}

/// A path with a directory part must name a file; a bare name is looked up
/// on `PATH` the way the child is spawned.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Run `files` and resolve to exactly one summary or error.
pub async fn run(files: Vec<PathBuf>, options: SupervisorOptions) -> Result<Summary, SupervisorError> {
    let mode = options.effective_mode();
    info!(%mode, files = files.len(), "supervising test run");
    match mode {
        Mode::Loader => run_loader(files, &options).await,
        _ => run_wrapper(files, &options).await,
    }
}

// ============================================================================
// WRAPPER MODE
// ============================================================================

async fn run_wrapper(files: Vec<PathBuf>, options: &SupervisorOptions) -> Result<Summary, SupervisorError> {
    let generator = WrapperGenerator::new(options.wrapper.clone());
    let batch = generator.generate_batch(&files).await?;
    let wrappers = batch.wrappers();
    let reporter = options.reporter;

    let result = tokio::task::spawn_blocking(move || {
        runner::on_interpreter_thread(move || {
            let mut runner = Runner::new(reporter.build(), runner::stdout());
            runner.run(&wrappers)
        })
    })
    .await;

    batch.cleanup().await;
    match result {
        Ok(Ok(summary)) => Ok(summary),
        Ok(Err(err)) => Err(SupervisorError::Runner {
            reason: err.to_string(),
        }),
        Err(err) => Err(SupervisorError::Runner {
            reason: err.to_string(),
        }),
    }
}

// ============================================================================
// LOADER MODE
// ============================================================================

async fn run_loader(files: Vec<PathBuf>, options: &SupervisorOptions) -> Result<Summary, SupervisorError> {
    let program = match &options.program {
        Some(program) => program.clone(),
        None => std::env::current_exe().map_err(|source| SupervisorError::Spawn {
            program: PathBuf::from("cloister"),
            source,
        })?,
    };
    let summary_path = summary_path(&options.wrapper);
    if let Some(dir) = summary_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| SupervisorError::Spawn {
                program: program.clone(),
                source,
            })?;
    }
    let _ = tokio::fs::remove_file(&summary_path).await;

    let mut command = Command::new(&program);
    command.arg("exec");
    if let Some(config) = &options.config_file {
        command.arg("--config").arg(config);
    }
    command
        .args(&files)
        .env(ENV_PRELOAD, "1")
        .env(ENV_ISOLATION, options.transform.strategy.as_str())
        .env(ENV_DEBUG, if options.transform.debug { "1" } else { "0" })
        .env(ENV_PATTERN, options.transform.pattern.as_str())
        .env(ENV_REPORTER, options.reporter.as_str())
        .env(ENV_SUMMARY_FILE, &summary_path)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    debug!(program = %program.display(), summary = %summary_path.display(), "spawning test process");
    let status = command.status().await.map_err(|source| SupervisorError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(%status, "test process exited");

    match tokio::fs::read_to_string(&summary_path).await {
        Ok(json) => {
            let _ = tokio::fs::remove_file(&summary_path).await;
            serde_json::from_str(&json).map_err(|source| SupervisorError::Summary {
                path: summary_path,
                source,
            })
        }
        Err(_) if status.success() => Ok(Summary::synthetic_pass()),
        Err(_) => Err(SupervisorError::Process {
            status: status.to_string(),
        }),
    }
}

/// Where the child writes its summary: inside the working directory, keyed
/// by the parent's pid.
fn summary_path(wrapper: &WrapperOptions) -> PathBuf {
    wrapper
        .work_dir
        .join(format!("{}-summary-{}.json", wrapper.prefix, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_loader_hooks() {
        let options = SupervisorOptions::default();
        assert_eq!(options.effective_mode(), Mode::Loader);

        let no_hooks = SupervisorOptions {
            loader_hooks: false,
            ..Default::default()
        };
        assert_eq!(no_hooks.effective_mode(), Mode::Wrapper);

        let explicit = SupervisorOptions {
            mode: Mode::Wrapper,
            ..Default::default()
        };
        assert_eq!(explicit.effective_mode(), Mode::Wrapper);
    }

    #[test]
    fn auto_falls_back_to_wrappers_without_an_executable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SupervisorOptions {
            program: Some(dir.path().join("no-such-cloister")),
            ..Default::default()
        };
        assert_eq!(missing.loader_program(), None);
        assert_eq!(missing.effective_mode(), Mode::Wrapper);

        let forced = SupervisorOptions {
            mode: Mode::Loader,
            ..missing
        };
        assert_eq!(forced.effective_mode(), Mode::Loader);

        let present = dir.path().join("cloister");
        std::fs::write(&present, "").unwrap();
        let found = SupervisorOptions {
            program: Some(present.clone()),
            ..Default::default()
        };
        assert_eq!(found.loader_program(), Some(present));
        assert_eq!(found.effective_mode(), Mode::Loader);
    }

    #[test]
    fn summary_file_lives_in_work_dir() {
        let path = summary_path(&WrapperOptions::default());
        assert!(path.starts_with(".cloister"));
        assert!(path.to_string_lossy().ends_with(".json"));
    }
}
