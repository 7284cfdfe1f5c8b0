//! Offset-stable text rewriting buffer.
//!
//! The parse runs once against the original text, so every rewrite has to
//! leave previously recorded byte offsets valid. The buffer keeps one cell
//! per byte of the original source; replacing a span writes the replacement
//! into the span's first cell and blanks the rest, so the cell count (and
//! with it every offset) never changes no matter how much text a rewrite
//! adds. Rendering a span that contains earlier rewrites therefore yields
//! the already-rewritten text, which is what lets an enclosing statement
//! re-wrap its children after they have been instrumented.

use std::ops::Range;

/// One cell per source byte. Multi-byte characters occupy the cell of
/// their first byte; the continuation cells start empty.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    cells: Vec<String>,
}

impl SourceBuffer {
    /// Build a buffer over the original source text.
    pub fn new(source: &str) -> Self {
        let mut cells = vec![String::new(); source.len()];
        for (idx, ch) in source.char_indices() {
            cells[idx] = ch.to_string();
        }
        Self { cells }
    }

    /// Number of cells (the byte length of the original source).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Current text of a span, including any replacements already applied
    /// inside it.
    pub fn render(&self, range: Range<usize>) -> String {
        debug_assert!(range.end <= self.cells.len(), "render past end of buffer");
        self.cells[range].concat()
    }

    /// Replace a span: the replacement lands in the span's first cell and
    /// the remaining cells are blanked. Offsets outside the span are
    /// untouched.
    pub fn replace(&mut self, range: Range<usize>, replacement: String) {
        debug_assert!(range.start < range.end, "replace of empty span");
        debug_assert!(range.end <= self.cells.len(), "replace past end of buffer");
        self.cells[range.start] = replacement;
        for cell in &mut self.cells[range.start + 1..range.end] {
            cell.clear();
        }
    }

    /// Join every cell into the final rewritten text.
    pub fn into_string(self) -> String {
        self.cells.concat()
    }
}
