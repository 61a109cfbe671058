//! Fan-out/fan-in query execution.
//!
//! One query is sent to many independently addressed sources. Each source is
//! handled by a [`worker::SourceWorker`] that caps its rows and tags them with
//! the source id; all workers feed a bounded [`merge::MergeStage`] whose single
//! consumer writes one header and then every row through a
//! [`writer::RowWriter`].
//!
//! ```text
//! Dispatcher
//!   ├─ SourceWorker(source_0) ─┐
//!   ├─ SourceWorker(source_1) ─┼─▶ MergeStage ─▶ RowWriter ─▶ sink
//!   └─ SourceWorker(source_N) ─┘
//! ```

pub mod cursor;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod merge;
pub mod source;
pub mod value;
pub mod worker;
pub mod writer;

// Re-exports
pub use dispatcher::{Dispatcher, RunOptions, RunReport, Schedule};
pub use error::{CursorError, EngineError, SourceError};
pub use merge::HEADER_ID_COLUMN;
pub use source::{DataSource, Query, RowLimit, SourceId};
pub use worker::ExecutionOutcome;
pub use writer::{OutputFormat, RowWriter};
