//! Row-capped cursor over one source's result.

use crate::engine::RowCursor;
use crate::error::{CursorError, EngineError};
use crate::source::RowLimit;
use crate::value::format_row;

/// Wraps an engine cursor, caps the number of rows it delivers, and formats
/// each row into display strings.
///
/// The inner cursor is released exactly once: by [`LimitedCursor::release`]
/// or, failing that, on drop.
pub struct LimitedCursor {
    inner: Option<Box<dyn RowCursor>>,
    columns: Vec<String>,
    limit: RowLimit,
    delivered: usize,
}

impl LimitedCursor {
    pub fn new(inner: Box<dyn RowCursor>, limit: RowLimit) -> Self {
        let columns = inner.columns().to_vec();
        Self {
            inner: Some(inner),
            columns,
            limit,
            delivered: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows successfully returned by [`LimitedCursor::read_row`].
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn limit(&self) -> RowLimit {
        self.limit
    }

    /// Move to the next row. `Ok(false)` once the result is exhausted or the
    /// cursor was released.
    pub async fn advance(&mut self) -> Result<bool, EngineError> {
        match self.inner.as_mut() {
            Some(inner) => inner.advance().await,
            None => Ok(false),
        }
    }

    /// Read the current row.
    ///
    /// Fails with [`CursorError::LimitReached`] without touching the row when
    /// the cap is already met.
    pub fn read_row(&mut self) -> Result<Vec<String>, CursorError> {
        if self.limit.is_exhausted(self.delivered) {
            return Err(CursorError::LimitReached {
                limit: self.limit.0,
            });
        }
        let inner = self
            .inner
            .as_mut()
            .ok_or(CursorError::Scan(EngineError::NoCurrentRow))?;
        let values = inner.decode().map_err(CursorError::Scan)?;
        self.delivered += 1;
        Ok(format_row(&values))
    }

    /// Release the underlying cursor. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl Drop for LimitedCursor {
    fn drop(&mut self) {
        self.release();
    }
}
