//! Defines the command-line arguments and subcommands for the Cloister CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{interceptor::Strategy, runner::ReporterKind, supervisor::Mode};

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "cloister",
    version,
    about = "Run test modules in isolated compartments inside one process."
)]
pub struct CloisterArgs {
    /// Configuration file; defaults to ./cloister.toml when present.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log at debug level and print full error chains.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover test files and run them under the supervisor.
    Run {
        /// Files or directories to search for test files.
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: RunOptions,
    },
    /// Run test files directly in this process. Spawned children use this;
    /// it installs the load interceptor when CLOISTER_PRELOAD is set.
    Exec {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long, value_enum)]
        reporter: Option<ReporterKind>,
    },
    /// Print the source the load interceptor would compile for a file.
    Transform {
        #[arg(required = true)]
        file: PathBuf,

        #[arg(long, value_enum)]
        strategy: Option<Strategy>,

        /// Show a line diff against the original instead.
        #[arg(long)]
        diff: bool,
    },
    /// Print the wrapper module and source map generated for a file.
    Wrap {
        #[arg(required = true)]
        file: PathBuf,
    },
}

#[derive(Debug, Args, Default)]
pub struct RunOptions {
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    #[arg(long, value_enum)]
    pub reporter: Option<ReporterKind>,

    /// Directory for generated wrappers.
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Test-file pattern (regular expression).
    #[arg(long)]
    pub pattern: Option<String>,

    /// Log every generated isolation source.
    #[arg(long)]
    pub debug: bool,
}
