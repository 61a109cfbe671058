//! Runs one worker per source under a scheduling strategy, then shuts the
//! merge stage down and aggregates the outcomes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, FutureExt, StreamExt};
use tracing::{debug, error};

use crate::engine::QueryEngine;
use crate::error::SourceError;
use crate::merge::{MergeStage, WriteStats, DEFAULT_ROW_QUEUE_CAPACITY};
use crate::source::{DataSource, Query, RowLimit, SourceId};
use crate::worker::{ExecutionOutcome, SourceWorker};
use crate::writer::RowWriter;

pub const DEFAULT_ROW_LIMIT: RowLimit = RowLimit(200);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How workers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    /// One at a time, in source order, on the calling task.
    #[default]
    Sequential,
    /// All at once, each on its own tokio task.
    Concurrent,
}

impl Schedule {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel {
            Schedule::Concurrent
        } else {
            Schedule::Sequential
        }
    }

    fn max_in_flight(&self, workers: usize) -> usize {
        match self {
            Schedule::Sequential => 1,
            Schedule::Concurrent => workers.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub limit: RowLimit,
    /// Per-source deadline for executing the query and fetching its rows.
    pub timeout: Duration,
    pub schedule: Schedule,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_ROW_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            schedule: Schedule::Sequential,
        }
    }
}

impl RunOptions {
    /// Row queue capacity: the row limit, or a fixed default when unbounded.
    pub fn queue_capacity(&self) -> usize {
        if self.limit.is_unbounded() {
            DEFAULT_ROW_QUEUE_CAPACITY
        } else {
            self.limit.0
        }
    }
}

/// Per-source outcomes in source order, plus what the writer did.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<(SourceId, ExecutionOutcome)>,
    pub write: WriteStats,
}

impl RunReport {
    /// True only if every source completed. A source that hit its row limit
    /// counts as a failure. Write errors never affect this.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_completed())
    }

    pub fn failures(&self) -> impl Iterator<Item = &(SourceId, ExecutionOutcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_completed())
    }
}

pub struct Dispatcher {
    engine: Arc<dyn QueryEngine>,
    sources: Vec<DataSource>,
    query: Arc<Query>,
    options: RunOptions,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        sources: Vec<DataSource>,
        query: Query,
        options: RunOptions,
    ) -> Self {
        Self {
            engine,
            sources,
            query: Arc::new(query),
            options,
        }
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    /// Run every source, write the merged stream through `writer`, and
    /// return once the writer has flushed.
    pub async fn run(self, writer: Box<dyn RowWriter>) -> RunReport {
        let Dispatcher {
            engine,
            sources,
            query,
            options,
        } = self;

        let merge = MergeStage::start(writer, options.queue_capacity());
        let ids: Vec<SourceId> = sources.iter().map(|s| s.id).collect();
        let workers: Vec<SourceWorker> = sources
            .into_iter()
            .map(|source| {
                SourceWorker::new(
                    source,
                    engine.clone(),
                    query.clone(),
                    options.limit,
                    options.timeout,
                    merge.sinks(),
                )
            })
            .collect();

        debug!(
            "Dispatching {} sources ({:?})",
            workers.len(),
            options.schedule
        );
        let outcomes = run_workers(workers, options.schedule).await;
        debug!("All workers finished");

        let write = merge.finish().await;

        RunReport {
            outcomes: ids.into_iter().zip(outcomes).collect(),
            write,
        }
    }
}

/// Run the workers with at most `schedule.max_in_flight` active at once and
/// return their outcomes in worker order.
async fn run_workers(workers: Vec<SourceWorker>, schedule: Schedule) -> Vec<ExecutionOutcome> {
    let n = workers.len();
    let mut slots: Vec<Option<ExecutionOutcome>> = (0..n).map(|_| None).collect();

    let mut finished = stream::iter(workers.into_iter().enumerate())
        .map(|(i, worker)| async move {
            let id = worker.source().id;
            (i, id, launch(worker, schedule).await)
        })
        .buffer_unordered(schedule.max_in_flight(n));

    while let Some((i, id, outcome)) = finished.next().await {
        if !outcome.is_completed() {
            error!("{}: failed to process query: {}", id, outcome);
        }
        slots[i] = Some(outcome);
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                ExecutionOutcome::Failed(SourceError::Panicked("worker produced no outcome".into()))
            })
        })
        .collect()
}

async fn launch(worker: SourceWorker, schedule: Schedule) -> ExecutionOutcome {
    let result = match schedule {
        Schedule::Sequential => AssertUnwindSafe(worker.run())
            .catch_unwind()
            .await
            .map_err(panic_message),
        Schedule::Concurrent => tokio::spawn(worker.run())
            .await
            .map_err(|e| match e.try_into_panic() {
                Ok(payload) => panic_message(payload),
                Err(e) => e.to_string(),
            }),
    };
    result.unwrap_or_else(|msg| ExecutionOutcome::Failed(SourceError::Panicked(msg)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
