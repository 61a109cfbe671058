//! Query engine capability: open a source, ping it, run a query, iterate rows.
//!
//! The pipeline only talks to these traits. [`postgres::PgEngine`] speaks the
//! PostgreSQL wire protocol; [`memory::MemoryEngine`] serves scripted results
//! and is what the tests drive.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::source::Query;
use crate::value::Value;

pub use memory::{MemoryEngine, ScriptedSource};
pub use postgres::PgEngine;

/// Opens connections to data sources from their descriptors.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn open(&self, descriptor: &str) -> Result<Box<dyn Connection>, EngineError>;
}

/// A live connection to one data source.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Verify the source is reachable.
    async fn ping(&mut self) -> Result<(), EngineError>;

    /// Start executing `query`. The returned cursor owns its result stream.
    async fn query(&mut self, query: &Query) -> Result<Box<dyn RowCursor>, EngineError>;

    /// Best-effort cancel of the statement currently running on this
    /// connection.
    async fn cancel(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Shut the connection down. Dropping it without calling `close` must
    /// also release it.
    async fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A result cursor positioned before the first row.
#[async_trait]
pub trait RowCursor: Send {
    fn columns(&self) -> &[String];

    /// Move to the next row. `Ok(false)` means the result is exhausted.
    async fn advance(&mut self) -> Result<bool, EngineError>;

    /// Decode the current row, one value per column.
    fn decode(&mut self) -> Result<Vec<Value>, EngineError>;

    /// Release the underlying result. Called at most once.
    fn close(&mut self);
}
