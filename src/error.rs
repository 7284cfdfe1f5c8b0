//! Error types for the instrumentation pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced while instrumenting a source file.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// The grammar could not produce a clean parse. Instrumenting a
    /// partially parsed file would silently skip rewrites inside the
    /// damaged region, so the whole file is rejected instead.
    #[error("parse error in {file}: {detail}")]
    Parse { file: String, detail: String },

    /// The file could not be read (missing, unreadable, or not UTF-8).
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
