//! Decoded results: header, records, execution statistics and a forward-only cursor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use comfy_table::{presets::UTF8_FULL, Table};

use crate::error::{DecodeError, FalkorError, Result};
use crate::schema::SchemaKind;
use crate::value::Value;

/// How the server says a column's cells are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Unknown(i64),
    Scalar,
    Node,
    Relation,
}

impl ColumnKind {
    pub(crate) fn from_code(code: i64) -> Self {
        match code {
            1 => ColumnKind::Scalar,
            2 => ColumnKind::Node,
            3 => ColumnKind::Relation,
            other => ColumnKind::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// One row, with values aligned positionally to the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(keys: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    pub fn get_by_index(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or(FalkorError::IndexOutOfRange {
            index,
            len: self.values.len(),
        })
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Value> {
        self.keys
            .iter()
            .position(|k| k == name)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| FalkorError::UnknownColumn(name.to_string()))
    }

    /// Typed lookup by column name.
    pub fn get<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = FalkorError>,
    {
        T::try_from(self.get_by_name(name)?.clone())
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A row that could not be decoded, attributed to its offending column.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub row: usize,
    pub column: usize,
    pub error: DecodeError,
}

impl RowError {
    fn to_error(&self) -> FalkorError {
        FalkorError::Decode {
            row: self.row,
            column: self.column,
            source: self.error.clone(),
        }
    }
}

pub(crate) type Row = std::result::Result<Record, RowError>;

/// Server-reported execution statistics, e.g. `Nodes created: 3`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    raw: BTreeMap<String, String>,
}

impl QueryStats {
    pub const LABELS_ADDED: &'static str = "Labels added";
    pub const LABELS_REMOVED: &'static str = "Labels removed";
    pub const NODES_CREATED: &'static str = "Nodes created";
    pub const NODES_DELETED: &'static str = "Nodes deleted";
    pub const PROPERTIES_SET: &'static str = "Properties set";
    pub const PROPERTIES_REMOVED: &'static str = "Properties removed";
    pub const RELATIONSHIPS_CREATED: &'static str = "Relationships created";
    pub const RELATIONSHIPS_DELETED: &'static str = "Relationships deleted";
    pub const INDICES_CREATED: &'static str = "Indices created";
    pub const INDICES_DELETED: &'static str = "Indices deleted";
    pub const CACHED_EXECUTION: &'static str = "Cached execution";
    pub const EXECUTION_TIME: &'static str = "Query internal execution time";

    /// Parse `Key: value` lines. Lines without a separator are ignored.
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let raw = lines
            .into_iter()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self { raw }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.raw.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn counter(&self, key: &str) -> u64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn labels_added(&self) -> u64 {
        self.counter(Self::LABELS_ADDED)
    }

    pub fn labels_removed(&self) -> u64 {
        self.counter(Self::LABELS_REMOVED)
    }

    pub fn nodes_created(&self) -> u64 {
        self.counter(Self::NODES_CREATED)
    }

    pub fn nodes_deleted(&self) -> u64 {
        self.counter(Self::NODES_DELETED)
    }

    pub fn properties_set(&self) -> u64 {
        self.counter(Self::PROPERTIES_SET)
    }

    pub fn properties_removed(&self) -> u64 {
        self.counter(Self::PROPERTIES_REMOVED)
    }

    pub fn relationships_created(&self) -> u64 {
        self.counter(Self::RELATIONSHIPS_CREATED)
    }

    pub fn relationships_deleted(&self) -> u64 {
        self.counter(Self::RELATIONSHIPS_DELETED)
    }

    pub fn indices_created(&self) -> u64 {
        self.counter(Self::INDICES_CREATED)
    }

    pub fn indices_deleted(&self) -> u64 {
        self.counter(Self::INDICES_DELETED)
    }

    pub fn cached_execution(&self) -> bool {
        self.counter(Self::CACHED_EXECUTION) == 1
    }

    /// Server-side execution time in milliseconds.
    pub fn execution_time_ms(&self) -> Option<f64> {
        self.get(Self::EXECUTION_TIME)?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Unstarted,
    Positioned(usize),
    Exhausted,
}

/// The outcome of one query.
///
/// Iterate with [`ResultSet::next`] / [`ResultSet::record`]. Rendering
/// ([`ResultSet::to_table`], `Display`) always covers every row and never
/// moves the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Vec<Column>,
    rows: Vec<Row>,
    stats: QueryStats,
    cursor: Cursor,
}

impl ResultSet {
    pub(crate) fn new(columns: Vec<Column>, rows: Vec<Row>, stats: QueryStats) -> Self {
        Self {
            columns,
            rows,
            stats,
            cursor: Cursor::Unstarted,
        }
    }

    pub fn header(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Advance to the next record. Returns false once the rows run out, and
    /// keeps returning false from then on.
    pub fn next(&mut self) -> bool {
        let next = match self.cursor {
            Cursor::Unstarted => 0,
            Cursor::Positioned(i) => i + 1,
            Cursor::Exhausted => return false,
        };
        if next < self.rows.len() {
            self.cursor = Cursor::Positioned(next);
            true
        } else {
            self.cursor = Cursor::Exhausted;
            false
        }
    }

    /// The record under the cursor.
    pub fn record(&self) -> Result<&Record> {
        match self.cursor {
            Cursor::Unstarted => Err(FalkorError::State(
                "record() called before next()".to_string(),
            )),
            Cursor::Exhausted => Err(FalkorError::State(
                "record() called after the result set was exhausted".to_string(),
            )),
            Cursor::Positioned(i) => self.rows[i].as_ref().map_err(RowError::to_error),
        }
    }

    /// Every row in order, independent of the cursor.
    pub fn records(&self) -> impl Iterator<Item = Result<&Record>> {
        self.rows
            .iter()
            .map(|row| row.as_ref().map_err(RowError::to_error))
    }

    /// Rows that failed to decode.
    pub fn row_errors(&self) -> impl Iterator<Item = &RowError> {
        self.rows.iter().filter_map(|row| row.as_ref().err())
    }

    /// Schema dictionaries some row needed but could not find.
    pub(crate) fn unresolved_schema(&self) -> Vec<SchemaKind> {
        let mut kinds: Vec<SchemaKind> = self
            .row_errors()
            .filter_map(|e| match e.error {
                DecodeError::UnresolvedSchemaId { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Render every row as a text table.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(self.columns.iter().map(|c| c.name.clone()));
        for row in &self.rows {
            match row {
                Ok(record) => {
                    table.add_row(record.values().iter().map(|v| v.to_string()));
                }
                Err(e) => {
                    let mut cells = vec![String::new(); self.columns.len().max(1)];
                    let slot = e.column.min(cells.len() - 1);
                    cells[slot] = format!("<{}>", e.error);
                    table.add_row(cells);
                }
            }
        }
        table
    }

    pub fn pretty_print(&self) {
        println!("{}", self.to_table());
    }
}

impl fmt::Display for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_table())
    }
}
