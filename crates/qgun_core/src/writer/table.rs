use std::io::{self, Write};

use super::RowWriter;

/// Spaces between a cell and the next column.
const PADDING: usize = 1;

/// Column-aligned writer.
///
/// Rows are buffered and the widest cell seen in each column sets that
/// column's width. Everything is written on `flush`, which happens once at
/// the end of the stream.
pub struct TableWriter {
    out: Box<dyn Write + Send>,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
}

impl TableWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            rows: Vec::new(),
            widths: Vec::new(),
        }
    }

    /// Current width of each column, in characters.
    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let last = row.len().saturating_sub(1);
            for (i, cell) in row.iter().enumerate() {
                if i == last {
                    out.push_str(cell);
                } else {
                    out.push_str(&format!(
                        "{:<width$}",
                        cell,
                        width = self.widths[i] + PADDING
                    ));
                }
            }
            out.push('\n');
        }
        out
    }
}

impl RowWriter for TableWriter {
    fn write_row(&mut self, row: &[String]) -> io::Result<()> {
        if self.widths.len() < row.len() {
            self.widths.resize(row.len(), 0);
        }
        for (w, cell) in self.widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
        self.rows.push(row.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let rendered = self.render();
        self.rows.clear();
        self.out.write_all(rendered.as_bytes())?;
        self.out.flush()
    }
}
