use std::time::Duration;

use thiserror::Error;

/// Convenience alias for `Result<T, SourceError>`.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by a query engine: opening, pinging, executing, fetching,
/// or decoding.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    #[error("no current row (advance was not called or returned false)")]
    NoCurrentRow,

    /// Failure injected by the in-memory engine.
    #[error("{0}")]
    Script(String),
}

/// Per-source failure, fatal to that source only.
///
/// Every variant is caught at the worker boundary, logged with the source id,
/// and folded into the run report. None of them stops other sources or the
/// output stream.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("connection error: {0}")]
    Connection(#[source] EngineError),

    #[error("query error: {0}")]
    Query(#[source] EngineError),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("scan error: {0}")]
    Scan(#[source] EngineError),

    #[error("iteration error: {0}")]
    Iteration(#[source] EngineError),

    #[error("row queue closed before the source finished")]
    OutputClosed,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Errors from [`crate::cursor::LimitedCursor::read_row`].
#[derive(Error, Debug)]
pub enum CursorError {
    /// The cursor already delivered `limit` rows and more are available.
    #[error("row limit ({limit}) reached")]
    LimitReached { limit: usize },

    #[error(transparent)]
    Scan(EngineError),
}

impl SourceError {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Connection(_) => "connection",
            SourceError::Query(_) | SourceError::DeadlineExceeded(_) => "query",
            SourceError::Scan(_) => "scan",
            SourceError::Iteration(_) => "iteration",
            SourceError::OutputClosed => "output",
            SourceError::Panicked(_) => "panic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reached_carries_limit() {
        let err = CursorError::LimitReached { limit: 7 };
        assert_eq!(err.to_string(), "row limit (7) reached");
    }

    #[test]
    fn test_source_error_display_includes_cause() {
        let err = SourceError::Connection(EngineError::Script("refused".into()));
        assert_eq!(err.to_string(), "connection error: refused");
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn test_deadline_is_a_query_error() {
        let err = SourceError::DeadlineExceeded(Duration::from_millis(250));
        assert_eq!(err.kind(), "query");
        assert!(err.to_string().contains("250ms"));
    }
}
