//! Call frames and stack-trace rendering.

use std::{collections::HashMap, rc::Rc};

use crate::{
    runtime::{value::ObjectRef, ModuleSource, Realm},
    wrapper::sourcemap::SourceMap,
};

/// Frames deeper than this raise a `RangeError`.
pub const MAX_CALL_DEPTH: usize = 256;

/// Source maps registered by generated modules, keyed by generated location.
pub type SourceMaps = HashMap<String, Rc<SourceMap>>;

/// One activation on the interpreter's call stack.
#[derive(Clone)]
pub struct Frame {
    /// Function name; empty for module top level.
    pub function: Rc<str>,
    pub source: Rc<ModuleSource>,
    /// Byte offset of the statement or call currently executing.
    pub offset: usize,
    pub realm: Realm,
    pub global: ObjectRef,
}

impl Frame {
    /// `location:line:column`, translated through a registered source map when
    /// the frame's module has one.
    pub fn position(&self, maps: &SourceMaps) -> String {
        let (line, column) = self.source.position(self.offset);
        if let Some(original) = maps
            .get(&self.source.location)
            .and_then(|map| {
                let line = u32::try_from(line.checked_sub(1)?).ok()?;
                let column = u32::try_from(column.checked_sub(1)?).ok()?;
                map.lookup(line, column)
            })
        {
            return format!("{}:{}:{}", original.source, original.line + 1, original.column + 1);
        }
        format!("{}:{line}:{column}", self.source.location)
    }

    pub fn render(&self, maps: &SourceMaps) -> String {
        let position = self.position(maps);
        if self.function.is_empty() {
            format!("    at {position}")
        } else {
            format!("    at {} ({position})", self.function)
        }
    }
}

/// `header` followed by one `at` line per frame, innermost first.
pub fn format_stack(header: &str, frames: &[Frame], maps: &SourceMaps) -> String {
    let mut lines = vec![header.to_string()];
    lines.extend(frames.iter().rev().map(|frame| frame.render(maps)));
    lines.join("\n")
}
