//! Test doubles for the ballot workspace.
//!
//! - [`FlakyStore`] wraps a store and fails or stalls chosen operations on
//!   demand.
//! - [`CountingStore`] wraps a store and records every write.
//! - [`seeded_store`] and friends build stores and configs for scenarios.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ballot::{
    CodeRecord, ElectionConfig, InMemoryRowStore, Row, RowPosition, RowStore, StoreError, Table,
    VoterId,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An operation [`FlakyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Scan(Table),
    Append(Table),
    /// Writes to one column of a table.
    WriteColumn(Table, usize),
}

/// Store wrapper that fails selected operations with
/// [`StoreError::Unavailable`], or never answers calls on stalled tables.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    faults: Mutex<HashSet<Fault>>,
    stalled: Mutex<HashSet<Table>>,
    write_delay: Option<Duration>,
}

impl<S: RowStore> FlakyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
            write_delay: None,
        }
    }

    /// Sleep before every cell write. Widens race windows in concurrency
    /// tests.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.faults).insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        lock(&self.faults).remove(&fault);
    }

    /// Every later call touching `table` hangs until the caller gives up.
    pub fn stall(&self, table: Table) {
        lock(&self.stalled).insert(table);
    }

    pub fn heal_all(&self) {
        lock(&self.faults).clear();
        lock(&self.stalled).clear();
    }

    async fn hang_if_stalled(&self, table: Table) {
        let stalled = lock(&self.stalled).contains(&table);
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    fn check(&self, fault: Fault) -> Result<(), StoreError> {
        if lock(&self.faults).contains(&fault) {
            return Err(StoreError::unavailable(format!("injected fault: {fault:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: RowStore> RowStore for FlakyStore<S> {
    async fn scan(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        self.hang_if_stalled(table).await;
        self.check(Fault::Scan(table))?;
        self.inner.scan(table).await
    }

    async fn write_cell(
        &self,
        table: Table,
        row: RowPosition,
        column: usize,
        value: &str,
    ) -> Result<(), StoreError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.hang_if_stalled(table).await;
        self.check(Fault::WriteColumn(table, column))?;
        self.inner.write_cell(table, row, column, value).await
    }

    async fn append_row(&self, table: Table, values: Row) -> Result<(), StoreError> {
        self.hang_if_stalled(table).await;
        self.check(Fault::Append(table))?;
        self.inner.append_row(table, values).await
    }
}

/// A write observed by [`CountingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Cell {
        table: Table,
        row: RowPosition,
        column: usize,
        value: String,
    },
    Append {
        table: Table,
        values: Row,
    },
}

/// Store wrapper that records every write it forwards.
pub struct CountingStore<S> {
    inner: Arc<S>,
    writes: Mutex<Vec<RecordedWrite>>,
    scans: Mutex<usize>,
}

impl<S: RowStore> CountingStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
            scans: Mutex::new(0),
        }
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    pub fn appends_to(&self, table: Table) -> usize {
        lock(&self.writes)
            .iter()
            .filter(|w| matches!(w, RecordedWrite::Append { table: t, .. } if *t == table))
            .count()
    }

    pub fn scan_count(&self) -> usize {
        *lock(&self.scans)
    }
}

#[async_trait]
impl<S: RowStore> RowStore for CountingStore<S> {
    async fn scan(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        *lock(&self.scans) += 1;
        self.inner.scan(table).await
    }

    async fn write_cell(
        &self,
        table: Table,
        row: RowPosition,
        column: usize,
        value: &str,
    ) -> Result<(), StoreError> {
        lock(&self.writes).push(RecordedWrite::Cell {
            table,
            row,
            column,
            value: value.to_string(),
        });
        self.inner.write_cell(table, row, column, value).await
    }

    async fn append_row(&self, table: Table, values: Row) -> Result<(), StoreError> {
        lock(&self.writes).push(RecordedWrite::Append {
            table,
            values: values.clone(),
        });
        self.inner.append_row(table, values).await
    }
}

/// An in-memory store holding unused codes given as `(class, code)`.
pub fn seeded_store(codes: &[(&str, &str)]) -> Arc<InMemoryRowStore> {
    Arc::new(InMemoryRowStore::with_codes(
        codes
            .iter()
            .map(|(class, code)| CodeRecord::issued(*class, 25, *code).to_row())
            .collect(),
    ))
}

/// A code row that was already redeemed by `voter`.
pub fn used_code_row(class: &str, code: &str, voter: i64) -> Row {
    let mut record = CodeRecord::issued(class, 25, code);
    record.is_used = true;
    record.voter_id = Some(VoterId::from(voter));
    record.phone = Some("+380500000000".into());
    record.full_name = Some("Earlier Voter".into());
    record.to_row()
}

/// The default election with `admins` on the allow-list.
pub fn config_with_admins(admins: &[i64]) -> Arc<ElectionConfig> {
    Arc::new(ElectionConfig {
        admins: admins.iter().copied().map(VoterId::from).collect(),
        ..ElectionConfig::default()
    })
}
