//! Output strategies for merged rows.

pub mod csv;
pub mod table;

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

pub use self::csv::CsvWriter;
pub use self::table::TableWriter;

/// Writes one row of cells at a time.
///
/// A failed `write_row` only loses that row; the caller keeps going.
pub trait RowWriter: Send {
    fn write_row(&mut self, row: &[String]) -> io::Result<()>;

    /// Emit anything buffered and flush the sink. Called once, at stream end.
    fn flush(&mut self) -> io::Result<()>;
}

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
}

impl OutputFormat {
    pub const VARIANTS: [OutputFormat; 2] = [OutputFormat::Table, OutputFormat::Csv];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Csv => "csv",
        }
    }

    /// Build the writer for this format over `sink`.
    pub fn writer(&self, sink: Box<dyn Write + Send>) -> Box<dyn RowWriter> {
        match self {
            OutputFormat::Table => Box::new(TableWriter::new(sink)),
            OutputFormat::Csv => Box::new(CsvWriter::new(sink)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported output format '{0}' (expected one of: table, csv)")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

/// In-memory sink whose clones share one buffer. Lets a caller hand a sink
/// to the merge stage and read what was written afterwards.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
