use std::borrow::Cow;
use std::io::{self, BufWriter, Write};

use super::RowWriter;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Quote one field per RFC 4180. Fields containing the delimiter, a quote, or
/// a line break are quoted, as are fields with a leading space or tab.
pub fn quote_field(value: &str) -> Cow<'_, str> {
    let needs_quoting = value.contains([DELIMITER, QUOTE, '\n', '\r'])
        || value.starts_with([' ', '\t']);
    if needs_quoting {
        Cow::Owned(format!("{QUOTE}{}{QUOTE}", value.replace(QUOTE, "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Encode a row as one CSV record, including the trailing newline.
pub fn encode_row(row: &[String]) -> String {
    let mut line = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        line.push_str(&quote_field(cell));
    }
    line.push('\n');
    line
}

/// CSV writer. Each row is encoded immediately into a buffered sink; `flush`
/// pushes the buffer out.
pub struct CsvWriter {
    out: BufWriter<Box<dyn Write + Send>>,
}

impl CsvWriter {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            out: BufWriter::new(sink),
        }
    }
}

impl RowWriter for CsvWriter {
    fn write_row(&mut self, row: &[String]) -> io::Result<()> {
        self.out.write_all(encode_row(row).as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
