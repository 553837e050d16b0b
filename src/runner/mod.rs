//! The host test runner.
//!
//! Files are imported one at a time into a shared host realm. Tests a file
//! registers with `cloister:test` run after the file finishes evaluating, and
//! every finished test is streamed to the reporter. A file that fails to load
//! becomes one synthetic failing test named after the file; anything it had
//! registered is cancelled.

pub mod discovery;
pub mod harness;
pub mod reporter;
pub mod summary;

use std::{
    error::Error as _,
    io::{self, Write as _},
    path::{Path, PathBuf},
    thread,
    time::Instant,
};

use termcolor::{ColorChoice, StandardStream, WriteColor};
use tracing::{info, warn};

use crate::{
    errors::HostError,
    host::{builtins, Host},
    runtime::Interpreter,
};

use harness::{SharedHarness, TestHarness};

pub use discovery::discover;
pub use reporter::{Reporter, ReporterKind};
pub use summary::Summary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { message: String },
    Skipped,
    Todo,
    Cancelled,
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed { .. } => "failed",
            TestOutcome::Skipped => "skipped",
            TestOutcome::Todo => "todo",
            TestOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub file: String,
    pub name: String,
    /// 0 for top-level tests, 1 for their subtests, and so on.
    pub depth: usize,
    pub outcome: TestOutcome,
    pub duration_ms: u64,
}

/// Stdout, colored when it is a terminal.
pub fn stdout() -> Box<dyn WriteColor> {
    let choice = if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    Box::new(StandardStream::stdout(choice))
}

/// Native stack reserved for the thread that drives the interpreter. Sized so
/// `MAX_CALL_DEPTH` nested calls fit in an unoptimized build.
pub const INTERPRETER_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Run `work` on a fresh thread with `INTERPRETER_STACK_SIZE` of stack and
/// wait for it. Runaway recursion then ends in the interpreter's `RangeError`
/// instead of overflowing the caller's thread.
pub fn on_interpreter_thread<F, T>(work: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name("cloister-interpreter".into())
        .stack_size(INTERPRETER_STACK_SIZE)
        .spawn(work)?
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "interpreter thread panicked"))
}

pub struct Runner {
    interp: Interpreter,
    host: Host,
    harness: SharedHarness,
    reporter: Box<dyn Reporter>,
    out: Box<dyn WriteColor>,
}

impl Runner {
    /// A runner over a fresh interpreter and a host using every registered
    /// loader hook.
    pub fn new(reporter: Box<dyn Reporter>, out: Box<dyn WriteColor>) -> Self {
        Self::with_parts(Interpreter::new(), Host::new(), reporter, out)
    }

    pub fn with_parts(mut interp: Interpreter, host: Host, reporter: Box<dyn Reporter>, out: Box<dyn WriteColor>) -> Self {
        let harness = TestHarness::shared();
        builtins::install(&mut interp);
        interp.register_builtin("cloister:test", harness::test_module(&harness));
        Self {
            interp,
            host,
            harness,
            reporter,
            out,
        }
    }

    /// Run every file in order and return the combined summary.
    pub fn run(&mut self, files: &[PathBuf]) -> Summary {
        info!(files = files.len(), "test run started");
        let started = Instant::now();
        let mut summary = Summary::default();

        if let Err(err) = self.reporter.start(self.out.as_mut(), files.len()) {
            warn!(%err, "reporter output failed");
        }
        for file in files {
            self.run_file(file, &mut summary);
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = self.reporter.finish(self.out.as_mut(), &summary) {
            warn!(%err, "reporter output failed");
        }
        let _ = self.out.flush();

        info!(
            tests = summary.tests,
            passed = summary.passed,
            failed = summary.failed,
            "test run finished"
        );
        summary
    }

    fn run_file(&mut self, file: &Path, summary: &mut Summary) {
        let location = file.to_string_lossy().to_string();
        self.harness.borrow_mut().begin_file(location.clone());

        match self.host.import(&mut self.interp, &location, None) {
            Ok(_) => {
                let pending = self.harness.borrow_mut().take_pending();
                for registration in pending {
                    harness::run_registration(&self.harness, &mut self.interp, registration);
                    self.flush_reports(summary);
                }
            }
            Err(err) => {
                warn!(file = %location, %err, "test file failed to load");
                let mut harness = self.harness.borrow_mut();
                harness.record_failure(location.clone(), describe_host_error(&err));
                harness.cancel_pending();
            }
        }
        self.flush_reports(summary);
    }

    fn flush_reports(&mut self, summary: &mut Summary) {
        let reports = self.harness.borrow_mut().take_reports();
        for report in reports {
            summary.record(&report.outcome);
            if let Err(err) = self.reporter.report(self.out.as_mut(), &report) {
                warn!(%err, "reporter output failed");
            }
        }
    }
}

/// Thrown values keep their own stack; loader failures print their cause chain.
fn describe_host_error(err: &HostError) -> String {
    if let HostError::Evaluation { thrown, .. } = err {
        return harness::describe(thrown);
    }
    let mut text = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        text.push_str(&format!("\n  caused by: {inner}"));
        cause = inner.source();
    }
    text
}
