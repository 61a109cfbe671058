//! Scripted in-memory engine.
//!
//! Each descriptor maps to a [`ScriptedSource`] with fixed columns and rows
//! and optional failures at open, ping, query, or a given row, or a panic
//! inside `query`. Shared counters record how many connections and cursors
//! were opened and released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Connection, QueryEngine, RowCursor};
use crate::error::EngineError;
use crate::source::Query;
use crate::value::Value;

/// Where a scripted row fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFailure {
    /// `advance` onto the row errors.
    Fetch(String),
    /// `advance` succeeds, `decode` errors.
    Decode(String),
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub fail_open: Option<String>,
    pub fail_ping: Option<String>,
    pub fail_query: Option<String>,
    pub fail_at_row: Option<(usize, RowFailure)>,
    pub panic_on_query: Option<String>,
    pub query_delay: Option<Duration>,
    pub row_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new<C: Into<String>>(columns: impl IntoIterator<Item = C>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn row<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Append `n` single-column rows `0..n`.
    pub fn counting_rows(mut self, n: i64) -> Self {
        for i in 0..n {
            self.rows.push(vec![Value::Int(i)]);
        }
        self
    }

    pub fn fail_open(mut self, msg: &str) -> Self {
        self.fail_open = Some(msg.to_string());
        self
    }

    pub fn fail_ping(mut self, msg: &str) -> Self {
        self.fail_ping = Some(msg.to_string());
        self
    }

    pub fn fail_query(mut self, msg: &str) -> Self {
        self.fail_query = Some(msg.to_string());
        self
    }

    pub fn fail_at_row(mut self, index: usize, failure: RowFailure) -> Self {
        self.fail_at_row = Some((index, failure));
        self
    }

    /// Panic inside `query`, as a buggy driver would.
    pub fn panic_on_query(mut self, msg: &str) -> Self {
        self.panic_on_query = Some(msg.to_string());
        self
    }

    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = Some(delay);
        self
    }
}

/// Open/close bookkeeping shared by every connection and cursor of an engine.
#[derive(Debug, Default)]
pub struct MemoryStats {
    pub connections_opened: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub cursors_opened: AtomicUsize,
    pub cursors_released: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl MemoryStats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryEngine {
    sources: HashMap<String, ScriptedSource>,
    stats: Arc<MemoryStats>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, descriptor: &str, source: ScriptedSource) -> Self {
        self.sources.insert(descriptor.to_string(), source);
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl QueryEngine for MemoryEngine {
    async fn open(&self, descriptor: &str) -> Result<Box<dyn Connection>, EngineError> {
        let source = self
            .sources
            .get(descriptor)
            .ok_or_else(|| EngineError::Script(format!("unknown source '{}'", descriptor)))?;
        if let Some(msg) = &source.fail_open {
            return Err(EngineError::Script(msg.clone()));
        }
        self.stats.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            source: source.clone(),
            stats: self.stats.clone(),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    source: ScriptedSource,
    stats: Arc<MemoryStats>,
    closed: bool,
}

impl MemoryConnection {
    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.connections_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn ping(&mut self) -> Result<(), EngineError> {
        match &self.source.fail_ping {
            Some(msg) => Err(EngineError::Script(msg.clone())),
            None => Ok(()),
        }
    }

    async fn query(&mut self, _query: &Query) -> Result<Box<dyn RowCursor>, EngineError> {
        if let Some(delay) = self.source.query_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = &self.source.fail_query {
            return Err(EngineError::Script(msg.clone()));
        }
        if let Some(msg) = &self.source.panic_on_query {
            panic!("{}", msg);
        }
        self.stats.cursors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            columns: self.source.columns.clone(),
            rows: self.source.rows.clone(),
            fail_at_row: self.source.fail_at_row.clone(),
            row_delay: self.source.row_delay,
            next: 0,
            current: None,
            stats: self.stats.clone(),
            released: false,
        }))
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        self.stats.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.mark_closed();
        Ok(())
    }
}

struct MemoryCursor {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    fail_at_row: Option<(usize, RowFailure)>,
    row_delay: Option<Duration>,
    next: usize,
    current: Option<usize>,
    stats: Arc<MemoryStats>,
    released: bool,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn advance(&mut self) -> Result<bool, EngineError> {
        if let Some(delay) = self.row_delay {
            tokio::time::sleep(delay).await;
        }
        if self.next >= self.rows.len() {
            self.current = None;
            return Ok(false);
        }
        if let Some((idx, RowFailure::Fetch(msg))) = &self.fail_at_row {
            if *idx == self.next {
                self.current = None;
                return Err(EngineError::Script(msg.clone()));
            }
        }
        self.current = Some(self.next);
        self.next += 1;
        Ok(true)
    }

    fn decode(&mut self) -> Result<Vec<Value>, EngineError> {
        let idx = self.current.ok_or(EngineError::NoCurrentRow)?;
        if let Some((fail_idx, RowFailure::Decode(msg))) = &self.fail_at_row {
            if *fail_idx == idx {
                return Err(EngineError::Script(msg.clone()));
            }
        }
        Ok(self.rows[idx].clone())
    }

    fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.cursors_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_descriptor_fails_open() {
        let engine = MemoryEngine::new();
        assert!(engine.open("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_cursor_walks_rows() {
        let engine =
            MemoryEngine::new().with_source("a", ScriptedSource::new(["n"]).counting_rows(2));
        let mut conn = engine.open("a").await.unwrap();
        let mut cur = conn.query(&Query::new("q", vec![])).await.unwrap();
        assert_eq!(cur.columns(), ["n".to_string()]);
        assert!(cur.advance().await.unwrap());
        assert_eq!(cur.decode().unwrap(), vec![Value::Int(0)]);
        assert!(cur.advance().await.unwrap());
        assert!(!cur.advance().await.unwrap());
        assert!(cur.decode().is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "driver bug")]
    async fn test_scripted_panic_on_query() {
        let engine = MemoryEngine::new()
            .with_source("a", ScriptedSource::new(["n"]).panic_on_query("driver bug"));
        let mut conn = engine.open("a").await.unwrap();
        let _ = conn.query(&Query::new("q", vec![])).await;
    }

    #[tokio::test]
    async fn test_dropping_connection_counts_as_closed() {
        let engine = MemoryEngine::new().with_source("a", ScriptedSource::new(["n"]));
        let stats = engine.stats();
        let conn = engine.open("a").await.unwrap();
        drop(conn);
        assert_eq!(MemoryStats::get(&stats.connections_opened), 1);
        assert_eq!(MemoryStats::get(&stats.connections_closed), 1);
    }
}
