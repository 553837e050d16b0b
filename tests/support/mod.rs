//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    fs, io,
    path::{Path, PathBuf},
    rc::Rc,
};

use cloister::runner::{Reporter, Summary, TestReport};
use tempfile::TempDir;
use termcolor::WriteColor;

/// A temporary project directory holding module files.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `source` at `relative` and return its absolute path.
    pub fn file(&self, relative: &str, source: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, source).unwrap();
        path
    }

    pub fn location(&self, relative: &str) -> String {
        self.dir.path().join(relative).to_string_lossy().to_string()
    }
}

/// A reporter that keeps every report for inspection.
#[derive(Clone, Default)]
pub struct Collector(pub Rc<RefCell<Vec<TestReport>>>);

impl Collector {
    pub fn reports(&self) -> Vec<TestReport> {
        self.0.borrow().clone()
    }

    pub fn find(&self, name: &str) -> Option<TestReport> {
        self.0.borrow().iter().find(|r| r.name == name).cloned()
    }
}

impl Reporter for Collector {
    fn report(&mut self, _out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()> {
        self.0.borrow_mut().push(report.clone());
        Ok(())
    }

    fn finish(&mut self, _out: &mut dyn WriteColor, _summary: &Summary) -> io::Result<()> {
        Ok(())
    }
}
