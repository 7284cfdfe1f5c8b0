//! Registration and the runtime prologue.
//!
//! Per-file bookkeeping happens here at instrumentation time, before the
//! rewritten module ever runs: the registry entry is created and every
//! branch site seeded, so reports can see a loaded-but-never-executed file.
//! The text prepended to the module is a single line containing no newline,
//! keeping every original line number intact, and it only checks that the
//! host bound the two runtime functions instead of redefining anything per
//! file.

use crate::registry::{self, BRANCH_FN, LINE_FN};
use crate::span::BranchRecord;

/// Seed the registry for `file` and return the prologue to prepend.
///
/// `source` is the file exactly as read; the registry keeps its lines for
/// report rendering. The first registration of a path wins.
pub fn emit(file: &str, source: &str, branches: &[BranchRecord]) -> String {
    registry::register_file(file, source, branches);
    prologue()
}

/// The guard prepended to every instrumented module. Fails the load loudly
/// when the host never bound the runtime functions, instead of letting the
/// module die on the first injected call.
pub fn prologue() -> String {
    format!(
        "if (typeof {line} !== 'function' || typeof {branch} !== 'function') \
         {{ throw new Error('covmark runtime is not installed in this environment'); }} ",
        line = LINE_FN,
        branch = BRANCH_FN
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Position, SourceLocation};

    fn record() -> BranchRecord {
        let arm = |column| SourceLocation {
            start: Position { line: 1, column },
            end: Position { line: 1, column: column + 1 },
        };
        BranchRecord {
            line: 1,
            column: 8,
            consequent: arm(12),
            alternate: arm(16),
        }
    }

    #[test]
    fn test_prologue_is_a_single_line() {
        let text = prologue();
        assert!(!text.contains('\n'));
        assert!(text.contains("__covLine"));
        assert!(text.contains("__covBranch"));
        assert!(text.contains("throw new Error"));
    }

    #[test]
    fn test_emit_seeds_registry_before_execution() {
        let file = "/virtual/preamble/seed.js";
        let text = emit(file, "var r = a ? b : c;\n", &[record()]);
        assert_eq!(text, prologue());

        let coverage = registry::file_record(file).expect("registered at emit time");
        assert!(coverage.lines.is_empty());
        assert!(coverage.branches.contains_key(&(1, 8)));
        assert_eq!(coverage.source, vec!["var r = a ? b : c;"]);
    }

    #[test]
    fn test_emit_keeps_existing_counts() {
        let file = "/virtual/preamble/repeat.js";
        emit(file, "f();\n", &[]);
        registry::line_hit(file, 1);

        emit(file, "f();\n", &[]);
        assert_eq!(registry::file_record(file).unwrap().line_count(1), 1);
    }
}
