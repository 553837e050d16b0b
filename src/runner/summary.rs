//! The terminal result of a test run.

use serde::{Deserialize, Serialize};

use super::TestOutcome;

/// Counts for one run. `failed` is always derived from the other counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub tests: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub todo: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
}

impl Summary {
    pub fn new(tests: usize, passed: usize, skipped: usize, todo: usize, cancelled: usize) -> Self {
        let mut summary = Self {
            tests,
            passed,
            skipped,
            todo,
            cancelled,
            ..Default::default()
        };
        summary.failed = summary.derived_failures();
        summary
    }

    /// The stand-in for a child that exited cleanly without reporting counts.
    pub fn synthetic_pass() -> Self {
        Self::new(1, 1, 0, 0, 0)
    }

    pub fn record(&mut self, outcome: &TestOutcome) {
        self.tests += 1;
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::Todo => self.todo += 1,
            TestOutcome::Cancelled => self.cancelled += 1,
            TestOutcome::Failed { .. } => {}
        }
        self.failed = self.derived_failures();
    }

    /// `tests − passed − skipped − cancelled − todo`, never negative.
    pub fn derived_failures(&self) -> usize {
        self.tests
            .saturating_sub(self.passed)
            .saturating_sub(self.skipped)
            .saturating_sub(self.cancelled)
            .saturating_sub(self.todo)
    }

    pub fn success(&self) -> bool {
        self.derived_failures() == 0
    }

    /// Fold another run's counts into this one.
    pub fn merge(&mut self, other: &Summary) {
        self.tests += other.tests;
        self.passed += other.passed;
        self.skipped += other.skipped;
        self.todo += other.todo;
        self.cancelled += other.cancelled;
        self.duration_ms += other.duration_ms;
        self.failed = self.derived_failures();
    }
}
