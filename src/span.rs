//! Source positions shared across the instrumenter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column (0-indexed), the convention the probe calls carry.
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Start/end extent of a node in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start: Position,
    pub end: Position,
}

impl SourceLocation {
    /// Create a location from a tree-sitter node.
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start: Position {
                line: start.row as u32 + 1, // tree-sitter is 0-indexed
                column: start.column as u32,
            },
            end: Position {
                line: end.row as u32 + 1,
                column: end.column as u32,
            },
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Static description of one rewritten conditional: where the probe sits
/// and where each arm lives in the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BranchRecord {
    /// Probe line (1-indexed).
    pub line: u32,
    /// Probe column (0-indexed).
    pub column: u32,
    /// Extent of the expression evaluated when the test is truthy.
    pub consequent: SourceLocation,
    /// Extent of the expression evaluated when the test is falsy.
    pub alternate: SourceLocation,
}
