//! Covmark - load-time JavaScript coverage instrumenter.
//!
//! Covmark rewrites JavaScript source so that executing it records line and
//! branch coverage in a process-wide registry. Statements get line counters,
//! conditional expressions get probes that log which arm ran, and the
//! rewrite never shifts source offsets, so reported line numbers always
//! match the original file.
//!
//! # Architecture
//!
//! The pipeline uses tree-sitter to find rewrite sites and a blanking
//! buffer to apply them without moving anything:
//!
//! - `tree`: tree-sitter parse plus a flattened, kind-classified arena
//! - `buffer`: offset-stable text rewriting over per-byte cells
//! - `rewrite`: bottom-up injection of counters, probes, and braces
//! - `preamble`: registry seeding and the runtime guard prologue
//! - `instrument`: the end-to-end source and file pipelines
//! - `registry`: process-wide coverage state and the runtime hooks
//! - `loader`: extension-table hook that instruments modules as they load
//! - `config`: covmark.yaml schema and discovery
//!
//! # Hooking a Module Host
//!
//! Implement [`loader::ModuleHost`] for your embedding, bind
//! [`registry::line_hit`] and [`registry::branch_probe`] to the script
//! globals named by [`registry::LINE_FN`] and [`registry::BRANCH_FN`],
//! then call [`loader::activate`].

pub mod buffer;
pub mod cli;
pub mod config;
pub mod error;
pub mod instrument;
pub mod loader;
pub mod preamble;
pub mod registry;
pub mod rewrite;
pub mod span;
pub mod tree;

pub use config::Config;
pub use error::InstrumentError;
pub use instrument::{
    instrument_file, instrument_source, summarize_file, summarize_source, InstrumentSummary,
};
pub use loader::{activate, activate_project, activate_with, Filter, ModuleHost};
pub use registry::{branch_probe, line_hit, reset, snapshot, FileCoverage, Truthy};
pub use span::{BranchRecord, Position, SourceLocation};
