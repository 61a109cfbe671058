//! Fan-in: the header slot, the bounded row queue, and the single consumer
//! that owns the output writer.
//!
//! ```text
//! worker 0 ──┐ offer(header)  ┌────────────┐
//! worker 1 ──┼───────────────▶│ HeaderSlot │──┐
//!    ...     │ send(row)      ├────────────┤  ├──▶ consumer ──▶ RowWriter
//! worker N ──┴───────────────▶│ row queue  │──┘
//!                             └────────────┘
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::writer::RowWriter;

/// Name of the synthetic leading column that identifies the source.
pub const HEADER_ID_COLUMN: &str = "DB_№";

/// Row queue capacity when the row limit is unbounded.
pub const DEFAULT_ROW_QUEUE_CAPACITY: usize = 200;

/// `[DB_№, column names...]`
pub type HeaderRow = Vec<String>;

/// `[source id, formatted cells...]`
pub type DataRow = Vec<String>;

/// Set-once header hand-off.
///
/// Every worker offers its header; the first offer wins and reaches the
/// consumer, later offers are refused without blocking.
pub struct HeaderSlot {
    tx: Mutex<Option<oneshot::Sender<HeaderRow>>>,
}

impl HeaderSlot {
    pub fn new() -> (Self, oneshot::Receiver<HeaderRow>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Offer a header. Returns true only for the winning offer.
    pub fn offer(&self, header: HeaderRow) -> bool {
        let tx = self.tx.lock().take();
        match tx {
            Some(tx) => tx.send(header).is_ok(),
            None => false,
        }
    }

    /// Refuse all further offers. If nobody won, the consumer stops waiting
    /// for a header.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// True once the slot was filled or closed.
    pub fn is_settled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// What the consumer did with the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub header_written: bool,
    pub rows_written: usize,
    pub write_errors: usize,
}

/// Producer-side handles given to each worker.
#[derive(Clone)]
pub struct MergeSinks {
    pub header: Arc<HeaderSlot>,
    pub rows: mpsc::Sender<DataRow>,
}

/// The running merge stage.
pub struct MergeStage {
    header: Arc<HeaderSlot>,
    rows: mpsc::Sender<DataRow>,
    consumer: JoinHandle<WriteStats>,
}

impl MergeStage {
    /// Start the consumer on a blocking thread. Must be called inside a tokio
    /// runtime.
    pub fn start(writer: Box<dyn RowWriter>, capacity: usize) -> Self {
        let (header, header_rx) = HeaderSlot::new();
        let (rows, rows_rx) = mpsc::channel(capacity.max(1));
        debug!("Starting merge consumer (row queue capacity {})", capacity.max(1));
        let consumer = tokio::task::spawn_blocking(move || consume(writer, header_rx, rows_rx));
        Self {
            header: Arc::new(header),
            rows,
            consumer,
        }
    }

    pub fn sinks(&self) -> MergeSinks {
        MergeSinks {
            header: self.header.clone(),
            rows: self.rows.clone(),
        }
    }

    /// Close the header slot, then the row queue, and wait for the consumer
    /// to drain and flush.
    ///
    /// The queue only reports end-of-stream once every [`MergeSinks`] clone
    /// has been dropped, so callers finish their workers first.
    pub async fn finish(self) -> WriteStats {
        let MergeStage {
            header,
            rows,
            consumer,
        } = self;
        debug!("Closing header slot");
        header.close();
        debug!("Closing row queue");
        drop(rows);
        debug!("Waiting for merge consumer");
        match consumer.await {
            Ok(stats) => {
                debug!(
                    "Merge consumer done: {} rows, {} write errors",
                    stats.rows_written, stats.write_errors
                );
                stats
            }
            Err(e) => {
                error!("Merge consumer failed: {}", e);
                WriteStats::default()
            }
        }
    }
}

fn consume(
    mut writer: Box<dyn RowWriter>,
    header_rx: oneshot::Receiver<HeaderRow>,
    mut rows_rx: mpsc::Receiver<DataRow>,
) -> WriteStats {
    let mut stats = WriteStats::default();

    match header_rx.blocking_recv() {
        Ok(header) => {
            debug!("Writing header");
            match writer.write_row(&header) {
                Ok(()) => stats.header_written = true,
                Err(e) => {
                    error!("Can't write header: {}", e);
                    stats.write_errors += 1;
                }
            }
        }
        Err(_) => debug!("No source produced a header"),
    }

    while let Some(row) = rows_rx.blocking_recv() {
        trace!("Writing row from {}", row.first().map(String::as_str).unwrap_or("?"));
        match writer.write_row(&row) {
            Ok(()) => stats.rows_written += 1,
            Err(e) => {
                error!("Can't write row: {}", e);
                stats.write_errors += 1;
            }
        }
    }

    if let Err(e) = writer.flush() {
        error!("Can't flush output: {}", e);
        stats.write_errors += 1;
    }
    stats
}
