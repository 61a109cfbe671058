#![allow(dead_code, unused_imports)]

pub use std::sync::Arc;
pub use std::time::Duration;

pub use qgun_core::engine::memory::{MemoryStats, RowFailure};
pub use qgun_core::engine::{MemoryEngine, ScriptedSource};
pub use qgun_core::writer::SharedBuffer;
pub use qgun_core::{
    DataSource, Dispatcher, ExecutionOutcome, OutputFormat, Query, RowLimit, RunOptions,
    RowWriter, RunReport, Schedule, SourceError, SourceId, HEADER_ID_COLUMN,
};

/// Run `descriptors` against `engine` and capture what the writer produced.
pub async fn run_sources(
    engine: &MemoryEngine,
    descriptors: &[&str],
    limit: usize,
    schedule: Schedule,
    format: OutputFormat,
) -> (RunReport, SharedBuffer) {
    let buf = SharedBuffer::default();
    let options = RunOptions {
        limit: RowLimit(limit),
        timeout: Duration::from_secs(5),
        schedule,
    };
    let report =
        run_with_writer(engine, descriptors, options, format.writer(Box::new(buf.clone()))).await;
    (report, buf)
}

/// Run `descriptors` against `engine` through a caller-supplied writer.
pub async fn run_with_writer(
    engine: &MemoryEngine,
    descriptors: &[&str],
    options: RunOptions,
    writer: Box<dyn RowWriter>,
) -> RunReport {
    Dispatcher::new(
        Arc::new(engine.clone()),
        DataSource::from_descriptors(descriptors.iter().copied()),
        Query::new("SELECT * FROM t WHERE x = $1", vec!["1".into()]),
        options,
    )
    .run(writer)
    .await
}

/// Parse captured CSV output into rows, one record per line.
pub fn csv_rows(buf: &SharedBuffer) -> Vec<Vec<String>> {
    buf.lines()
        .iter()
        .map(|l| parse_record(l).expect("valid csv line"))
        .collect()
}

/// Split one single-line CSV record. `None` on an unterminated quote or
/// stray text after a closing quote.
pub fn parse_record(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut after_quote = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (in_quotes, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => {
                in_quotes = false;
                after_quote = true;
            }
            (true, c) => field.push(c),
            (false, ',') => {
                fields.push(std::mem::take(&mut field));
                after_quote = false;
            }
            (false, '"') if field.is_empty() && !after_quote => in_quotes = true,
            (false, _) if after_quote => return None,
            (false, c) => field.push(c),
        }
    }
    if in_quotes {
        return None;
    }
    fields.push(field);
    Some(fields)
}

/// Header line count and data rows of a CSV capture.
pub fn split_header(rows: Vec<Vec<String>>) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
    rows.into_iter()
        .partition(|r| r.first().map(String::as_str) == Some(HEADER_ID_COLUMN))
}

pub fn sorted(mut rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    rows.sort();
    rows
}
