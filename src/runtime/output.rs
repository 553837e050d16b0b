//! Output sinks for script-visible console output.
//!
//! `console.log` and friends never write to stdout directly; they go through the
//! interpreter's [`OutputSink`] so tests can capture what a module printed.

use std::{cell::RefCell, rc::Rc};

/// Which console stream a line was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Out,
    Err,
}

pub trait OutputSink {
    fn emit(&mut self, stream: Stream, text: &str);
}

/// StdoutSink: writes `console.log` to stdout and `console.error` to stderr.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, stream: Stream, text: &str) {
        match stream {
            Stream::Out => println!("{text}"),
            Stream::Err => eprintln!("{text}"),
        }
    }
}

/// OutputBuffer: collects output into a shared string for tests and programmatic capture.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    buffer: Rc<RefCell<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.buffer.borrow().clone()
    }
}

impl OutputSink for OutputBuffer {
    fn emit(&mut self, _stream: Stream, text: &str) {
        let mut buffer = self.buffer.borrow_mut();
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(text);
    }
}
