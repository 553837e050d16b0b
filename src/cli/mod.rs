//! The Cloister Command-Line Interface.
//!
//! This module is the main entry point for all CLI commands and orchestrates
//! the core library functions.

pub mod args;
pub mod output;

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use tracing::{info, warn};

use crate::{
    config::{self, Config, Overrides},
    errors::{CloisterError, SupervisorError},
    interceptor::{self, InterceptorHooks, Strategy},
    logging,
    runner::{self, ReporterKind, Runner, Summary},
    supervisor,
    wrapper::{self, WrapperOptions},
};

use args::{CloisterArgs, Command, RunOptions};

/// The main entry point for the CLI.
pub async fn main() -> ExitCode {
    let args = CloisterArgs::parse();
    logging::init(args.verbose);
    let verbose = args.verbose;

    match dispatch(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            output::print_error(err, verbose);
            ExitCode::FAILURE
        }
    }
}

/// Run one command; `Ok(false)` means it ran but tests failed.
pub async fn dispatch(args: CloisterArgs) -> Result<bool, CloisterError> {
    let config_file = args.config.as_deref();
    match args.command {
        Command::Run { paths, options } => handle_run(config_file, &paths, options).await,
        Command::Exec { files, reporter } => handle_exec(config_file, files, reporter).await,
        Command::Transform { file, strategy, diff } => handle_transform(config_file, &file, strategy, diff),
        Command::Wrap { file } => handle_wrap(config_file, &file),
    }
}

/// Handles the `run` subcommand.
async fn handle_run(config_file: Option<&Path>, paths: &[PathBuf], options: RunOptions) -> Result<bool, CloisterError> {
    let overrides = Overrides {
        mode: options.mode,
        strategy: options.strategy,
        reporter: options.reporter,
        work_dir: options.work_dir,
        debug: options.debug.then_some(true),
        pattern: options.pattern,
    };
    let config = Config::load(config_file, &overrides)?;
    let files = runner::discover(paths, &config.pattern, Some(&config.work_dir));
    if files.is_empty() {
        warn!("no test files found");
        return Ok(true);
    }

    let summary = supervisor::run(files, config.supervisor_options()).await?;
    Ok(summary.success())
}

/// Handles the `exec` subcommand: the plain host runner.
async fn handle_exec(
    config_file: Option<&Path>,
    files: Vec<PathBuf>,
    reporter: Option<ReporterKind>,
) -> Result<bool, CloisterError> {
    let overrides = Overrides {
        reporter,
        ..Default::default()
    };
    let config = Config::load(config_file, &overrides)?;
    if config::preload_requested() {
        interceptor::install(config.transform_options());
    }

    let kind = config.reporter;
    let summary = tokio::task::spawn_blocking(move || {
        runner::on_interpreter_thread(move || {
            let mut runner = Runner::new(kind.build(), runner::stdout());
            runner.run(&files)
        })
    })
    .await
    .map_err(|err| SupervisorError::Runner {
        reason: err.to_string(),
    })?
    .map_err(|err| SupervisorError::Runner {
        reason: err.to_string(),
    })?;

    if let Some(path) = config::summary_file() {
        write_summary(&path, &summary)?;
    }
    Ok(summary.success())
}

fn write_summary(path: &Path, summary: &Summary) -> Result<(), CloisterError> {
    let json = serde_json::to_string(summary).map_err(|err| CloisterError::Io {
        context: format!("cannot encode summary for `{}`", path.display()),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })?;
    fs::write(path, json).map_err(|source| CloisterError::Io {
        context: format!("cannot write summary `{}`", path.display()),
        source,
    })?;
    info!(path = %path.display(), "summary written");
    Ok(())
}

/// Handles the `transform` subcommand.
fn handle_transform(
    config_file: Option<&Path>,
    file: &Path,
    strategy: Option<Strategy>,
    diff: bool,
) -> Result<bool, CloisterError> {
    let overrides = Overrides {
        strategy,
        ..Default::default()
    };
    let config = Config::load(config_file, &overrides)?;
    let location = absolute(file)?;
    let original = read(&location)?;
    let url = location.to_string_lossy();

    let hooks = InterceptorHooks::new(Arc::new(config.transform_options()));
    match hooks.transform(&url, &original) {
        Some(generated) if diff => output::print_diff(&original, &generated),
        Some(generated) => output::print_source(&format!("{} ({})", url, config.strategy), &generated),
        None => {
            eprintln!("{url} does not match the test-file pattern; it loads unchanged");
            output::print_source(&url, &original);
        }
    }
    Ok(true)
}

/// Handles the `wrap` subcommand.
fn handle_wrap(config_file: Option<&Path>, file: &Path) -> Result<bool, CloisterError> {
    let config = Config::load(config_file, &Overrides::default())?;
    let options: WrapperOptions = config.wrapper_options();
    let planned = wrapper::plan(&options.work_dir, &options.prefix, &[file.to_path_buf()])?;
    for planned_file in &planned {
        let rendered = wrapper::render(planned_file, &options.lockdown);
        output::print_source(&planned_file.wrapper.to_string_lossy(), &rendered.source);
        output::print_source(&planned_file.map.to_string_lossy(), &rendered.map.to_json());
    }
    Ok(true)
}

fn absolute(path: &Path) -> Result<PathBuf, CloisterError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|source| CloisterError::Io {
            context: "cannot determine the current directory".into(),
            source,
        })
}

fn read(path: &Path) -> Result<String, CloisterError> {
    fs::read_to_string(path).map_err(|source| CloisterError::Io {
        context: format!("cannot read `{}`", path.display()),
        source,
    })
}
