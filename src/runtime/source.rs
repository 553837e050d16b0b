/// The text of one module together with its location and a line index, so
/// byte offsets from AST spans can be turned into `line:column` positions.
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub location: String,
    pub text: String,
    line_starts: Vec<usize>,
}

impl ModuleSource {
    pub fn new(location: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            location: location.into(),
            text,
            line_starts,
        }
    }

    /// One-based `(line, column)` for a byte offset.
    pub fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next.saturating_sub(1),
        };
        let start = self.line_starts.get(line).copied().unwrap_or(0);
        let column = self
            .text
            .get(start..offset.min(self.text.len()))
            .map(|s| s.chars().count())
            .unwrap_or(0);
        (line + 1, column + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        let src = ModuleSource::new("a.mjs", "let a = 1;\nthrow a;\n");
        assert_eq!(src.position(0), (1, 1));
        assert_eq!(src.position(4), (1, 5));
        assert_eq!(src.position(11), (2, 1));
        assert_eq!(src.position(17), (2, 7));
    }
}
