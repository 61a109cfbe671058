//! Data sources, the shared query, and the per-source row limit.

use std::fmt;

/// Positional identifier of a data source (`source_0`, `source_1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub usize);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source_{}", self.0)
    }
}

/// One configured data source: its connection descriptor and its id.
#[derive(Clone, PartialEq, Eq)]
pub struct DataSource {
    pub id: SourceId,
    pub descriptor: String,
}

impl DataSource {
    /// Build the source list. Ids follow list position.
    pub fn from_descriptors<I, S>(descriptors: I) -> Vec<DataSource>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        descriptors
            .into_iter()
            .enumerate()
            .map(|(i, d)| DataSource {
                id: SourceId(i),
                descriptor: d.into(),
            })
            .collect()
    }
}

// Descriptors usually carry credentials.
impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("descriptor", &"<redacted>")
            .finish()
    }
}

/// Query text plus positional arguments. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    args: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            text: text.into(),
            args,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Maximum rows a single source may deliver. `0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowLimit(pub usize);

impl RowLimit {
    pub const UNBOUNDED: RowLimit = RowLimit(0);

    pub fn is_unbounded(&self) -> bool {
        self.0 == 0
    }

    /// Returns true once `delivered` rows exhaust the limit.
    pub fn is_exhausted(&self, delivered: usize) -> bool {
        self.0 > 0 && delivered >= self.0
    }
}

impl fmt::Display for RowLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "unbounded")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
