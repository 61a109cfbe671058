//! One source's lifecycle: connect, ping, query under a deadline, stream
//! tagged rows into the merge stage.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::cursor::LimitedCursor;
use crate::engine::{Connection, QueryEngine};
use crate::error::{CursorError, SourceError, SourceResult};
use crate::merge::{MergeSinks, HEADER_ID_COLUMN};
use crate::source::{DataSource, Query, RowLimit};

/// Terminal state of one source.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed { rows: usize },
    /// The source had more than `limit` rows; `limit` of them were delivered.
    LimitReached { limit: usize, rows: usize },
    Failed(SourceError),
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }

    /// Rows delivered to the merge stage, when known.
    pub fn rows(&self) -> Option<usize> {
        match self {
            ExecutionOutcome::Completed { rows } | ExecutionOutcome::LimitReached { rows, .. } => {
                Some(*rows)
            }
            ExecutionOutcome::Failed(_) => None,
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Completed { rows } => write!(f, "completed ({} rows)", rows),
            ExecutionOutcome::LimitReached { limit, .. } => {
                write!(f, "row limit ({}) reached", limit)
            }
            ExecutionOutcome::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Runs the query against a single source.
pub struct SourceWorker {
    source: DataSource,
    engine: Arc<dyn QueryEngine>,
    query: Arc<Query>,
    limit: RowLimit,
    timeout: Duration,
    sinks: MergeSinks,
}

impl SourceWorker {
    pub fn new(
        source: DataSource,
        engine: Arc<dyn QueryEngine>,
        query: Arc<Query>,
        limit: RowLimit,
        timeout: Duration,
        sinks: MergeSinks,
    ) -> Self {
        Self {
            source,
            engine,
            query,
            limit,
            timeout,
            sinks,
        }
    }

    pub fn source(&self) -> &DataSource {
        &self.source
    }

    /// Run to completion. Never retries; every failure becomes
    /// [`ExecutionOutcome::Failed`]. The worker's row sender is dropped on
    /// return.
    pub async fn run(self) -> ExecutionOutcome {
        match self.execute().await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::Failed(e),
        }
    }

    async fn execute(&self) -> SourceResult<ExecutionOutcome> {
        let id = self.source.id;
        debug!("{}: connecting", id);
        let mut conn = self
            .engine
            .open(&self.source.descriptor)
            .await
            .map_err(SourceError::Connection)?;

        let outcome = self.drive(conn.as_mut()).await;

        if let Err(e) = conn.close().await {
            warn!("{}: error closing connection: {}", id, e);
        }
        outcome
    }

    async fn drive(&self, conn: &mut dyn Connection) -> SourceResult<ExecutionOutcome> {
        let id = self.source.id;
        conn.ping().await.map_err(SourceError::Connection)?;

        let deadline = Instant::now() + self.timeout;
        debug!("{}: executing query (timeout {:?})", id, self.timeout);
        let inner = match timeout_at(deadline, conn.query(&self.query)).await {
            Ok(result) => result.map_err(SourceError::Query)?,
            Err(_) => {
                cancel_in_flight(conn, id).await;
                return Err(SourceError::DeadlineExceeded(self.timeout));
            }
        };

        let mut cursor = LimitedCursor::new(inner, self.limit);

        let mut header = Vec::with_capacity(cursor.columns().len() + 1);
        header.push(HEADER_ID_COLUMN.to_string());
        header.extend(cursor.columns().iter().cloned());
        if self.sinks.header.offer(header) {
            debug!("{}: header sent", id);
        } else {
            debug!("{}: skip sending header", id);
        }

        debug!("{}: processing rows", id);
        let outcome = self.stream_rows(&mut cursor, deadline).await;
        cursor.release();

        if matches!(outcome, Err(SourceError::DeadlineExceeded(_))) {
            cancel_in_flight(conn, id).await;
        }
        if let Ok(o) = &outcome {
            debug!("{}: {}", id, o);
        }
        outcome
    }

    async fn stream_rows(
        &self,
        cursor: &mut LimitedCursor,
        mut deadline: Instant,
    ) -> SourceResult<ExecutionOutcome> {
        let tag = self.source.id.to_string();
        loop {
            let more = match timeout_at(deadline, cursor.advance()).await {
                Ok(result) => result.map_err(SourceError::Iteration)?,
                Err(_) => return Err(SourceError::DeadlineExceeded(self.timeout)),
            };
            if !more {
                break;
            }

            let cells = match cursor.read_row() {
                Ok(cells) => cells,
                Err(CursorError::LimitReached { limit }) => {
                    return Ok(ExecutionOutcome::LimitReached {
                        limit,
                        rows: cursor.delivered(),
                    });
                }
                Err(CursorError::Scan(e)) => return Err(SourceError::Scan(e)),
            };

            let mut row = Vec::with_capacity(cells.len() + 1);
            row.push(tag.clone());
            row.extend(cells);

            // Blocks while the queue is full. Time spent waiting on the
            // writer is not charged to the source.
            let waiting = Instant::now();
            self.sinks
                .rows
                .send(row)
                .await
                .map_err(|_| SourceError::OutputClosed)?;
            deadline += waiting.elapsed();
        }
        Ok(ExecutionOutcome::Completed {
            rows: cursor.delivered(),
        })
    }
}

async fn cancel_in_flight(conn: &mut dyn Connection, id: crate::source::SourceId) {
    debug!("{}: deadline exceeded, cancelling statement", id);
    if let Err(e) = conn.cancel().await {
        warn!("{}: cancel request failed: {}", id, e);
    }
}
