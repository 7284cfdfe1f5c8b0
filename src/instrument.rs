//! The instrumentation pipeline.
//!
//! One call takes module text to rewritten text: strip a shebang, parse,
//! run the rewrite pass, register the file, prepend the prologue. The
//! file-level entry then redirects relative requires in the finished
//! output; the registered snapshot and every recorded line and column
//! refer to the file exactly as it was read.

use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::buffer::SourceBuffer;
use crate::error::InstrumentError;
use crate::preamble;
use crate::rewrite::Rewriter;
use crate::span::BranchRecord;
use crate::tree;

lazy_static! {
    /// `require('./x')` openings, through the quote and the leading dot.
    static ref RELATIVE_REQUIRE: Regex = Regex::new(r#"require\s*\(\s*("|')\."#).unwrap();
}

/// Instrument module text under the given registry path.
///
/// `file` should be the normalized form of the path the module executes
/// under; it is embedded into every injected call and used as the registry
/// key. Returns the rewritten text with the prologue prepended.
pub fn instrument_source(file: &str, text: &str) -> Result<String, InstrumentError> {
    let content = strip_shebang(text);
    let parsed = tree::parse(file, content)?;

    let mut buffer = SourceBuffer::new(content);
    let output = Rewriter::new(file, &parsed).run(&mut buffer);

    let prologue = preamble::emit(file, text, &output.branches);
    Ok(format!("{}{}", prologue, buffer.into_string()))
}

/// Instrument a file on disk.
///
/// Relative requires in the rewritten output are rebased onto the file's
/// own directory, so the module resolves its siblings no matter which
/// directory the host process runs from. The rebase touches only the
/// output; the registry keeps the source as read.
pub fn instrument_file(path: &Path) -> Result<String, InstrumentError> {
    let text = fs::read_to_string(path).map_err(|source| InstrumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let output = instrument_source(&normalize_path(path), &text)?;
    Ok(redirect_relative_requires(&output, path))
}

/// What instrumentation would inject into a file.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentSummary {
    pub file: String,
    /// Distinct lines that would receive a counter, sorted.
    pub tracked_lines: Vec<u32>,
    /// Total counters injected (a line can hold several statements).
    pub statement_count: usize,
    pub branches: Vec<BranchRecord>,
}

/// Dry run of the pipeline: parse and rewrite, but register nothing and
/// discard the text.
pub fn summarize_source(file: &str, text: &str) -> Result<InstrumentSummary, InstrumentError> {
    let content = strip_shebang(text);
    let parsed = tree::parse(file, content)?;

    let mut buffer = SourceBuffer::new(content);
    let output = Rewriter::new(file, &parsed).run(&mut buffer);

    let mut tracked_lines = output.tracked_lines.clone();
    tracked_lines.sort_unstable();
    tracked_lines.dedup();

    Ok(InstrumentSummary {
        file: file.to_string(),
        tracked_lines,
        statement_count: output.tracked_lines.len(),
        branches: output.branches,
    })
}

/// Dry run over a file on disk.
pub fn summarize_file(path: &Path) -> Result<InstrumentSummary, InstrumentError> {
    let text = fs::read_to_string(path).map_err(|source| InstrumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    summarize_source(&normalize_path(path), &text)
}

/// Forward-slash form of a path: the shape embedded in injected calls and
/// used as the registry key on every platform.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Rebase `require('./x')` and `require('../x')` onto `path`'s directory.
/// The consumed dot reappears as the `/.` suffix of the base, so `./x`
/// becomes `<dir>/./x` and `../x` becomes `<dir>/../x`.
pub fn redirect_relative_requires(text: &str, path: &Path) -> String {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => normalize_path(parent),
        _ => return text.to_string(),
    };
    RELATIVE_REQUIRE
        .replace_all(text, |caps: &regex::Captures| {
            format!("require({}{}/.", &caps[1], dir)
        })
        .into_owned()
}

/// Drop a leading `#!` line. The terminating newline stays, so every later
/// line keeps its number.
fn strip_shebang(text: &str) -> &str {
    match text.strip_prefix("#!") {
        Some(rest) => match rest.find('\n') {
            Some(end) => &rest[end..],
            None => "",
        },
        None => text,
    }
}
