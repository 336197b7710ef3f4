//! Row store abstraction.
//!
//! The backing store is spreadsheet-like: two tables, each with a fixed header
//! row, offering a full scan, a single-cell write and a row append. There is no
//! transaction and no compare-and-swap; every call is one network round-trip.
//!
//! Row positions are zero-based indexes into the data rows returned by
//! [`RowStore::scan`]. The header row is never part of a scan.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// The two logical tables of an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Codes,
    Votes,
}

impl Table {
    pub const CODES_HEADER: [&'static str; 7] = [
        "Class",
        "Student_Count",
        "Unique_Code",
        "Is_Used",
        "Telegram_ID",
        "Phone_Number",
        "Full_Name",
    ];

    pub const VOTES_HEADER: [&'static str; 7] = [
        "Timestamp",
        "Class",
        "Unique_Code",
        "Voter_Id",
        "Handle",
        "Full_Name",
        "Candidate_Voted",
    ];

    /// Worksheet name in the backing store.
    pub fn name(self) -> &'static str {
        match self {
            Table::Codes => "Codes",
            Table::Votes => "Votes",
        }
    }

    pub fn header(self) -> &'static [&'static str] {
        match self {
            Table::Codes => &Self::CODES_HEADER,
            Table::Votes => &Self::VOTES_HEADER,
        }
    }

    pub fn width(self) -> usize {
        self.header().len()
    }

    pub fn header_row(self) -> Row {
        self.header().iter().map(|h| h.to_string()).collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of cells, in header order. Trailing empty cells may be missing.
pub type Row = Vec<String>;

/// Position of a data row, as observed by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowPosition(pub usize);

impl fmt::Display for RowPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read/write access used by the voting flow.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// All data rows of `table`, in store order.
    async fn scan(&self, table: Table) -> Result<Vec<Row>, StoreError>;

    /// Overwrite a single cell.
    async fn write_cell(
        &self,
        table: Table,
        row: RowPosition,
        column: usize,
        value: &str,
    ) -> Result<(), StoreError>;

    /// Append one row after the last data row.
    async fn append_row(&self, table: Table, values: Row) -> Result<(), StoreError>;
}

/// Await a store call for at most `deadline`.
///
/// A call that outlives its deadline is dropped and reported as
/// [`StoreError::Unavailable`].
pub async fn within_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::unavailable(format!(
            "store call timed out after {}s",
            deadline.as_secs()
        ))),
    }
}

/// Destructive operations, only reachable from administrative tooling.
#[async_trait]
pub trait RowStoreAdmin: RowStore {
    /// Remove every row of `table`, header included.
    async fn clear(&self, table: Table) -> Result<(), StoreError>;

    /// Append many rows. Backends with a batch API should override this.
    async fn append_rows(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        for row in rows {
            self.append_row(table, row).await?;
        }
        Ok(())
    }
}

/// Process-local store holding both tables in memory.
///
/// Used in tests and for dry runs. Each table starts with its header row.
pub struct InMemoryRowStore {
    // Full grid per table; index 0 is the header row when present.
    tables: RwLock<HashMap<Table, Vec<Row>>>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::with_codes(Vec::new())
    }

    /// Store pre-populated with `codes` data rows.
    pub fn with_codes(codes: Vec<Row>) -> Self {
        let mut codes_grid = vec![Table::Codes.header_row()];
        codes_grid.extend(codes);

        let mut tables = HashMap::new();
        tables.insert(Table::Codes, codes_grid);
        tables.insert(Table::Votes, vec![Table::Votes.header_row()]);
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Copy of the data rows of `table`.
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        let tables = self.tables.read().await;
        tables
            .get(&table)
            .map(|grid| grid.iter().skip(1).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn scan(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        Ok(self.rows(table).await)
    }

    async fn write_cell(
        &self,
        table: Table,
        row: RowPosition,
        column: usize,
        value: &str,
    ) -> Result<(), StoreError> {
        if column >= table.width() {
            return Err(StoreError::ColumnOutOfRange { table, column });
        }
        let mut tables = self.tables.write().await;
        let grid = tables.entry(table).or_default();
        let cells = grid
            .get_mut(row.0 + 1)
            .ok_or(StoreError::RowOutOfRange { table, row: row.0 })?;
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value.to_string();
        Ok(())
    }

    async fn append_row(&self, table: Table, values: Row) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.entry(table).or_default().push(values);
        Ok(())
    }
}

#[async_trait]
impl RowStoreAdmin for InMemoryRowStore {
    async fn clear(&self, table: Table) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.insert(table, Vec::new());
        Ok(())
    }
}
