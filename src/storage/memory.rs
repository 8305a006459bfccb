use super::traits::{Row, StorageError, TableStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// In-memory table store with injectable failures.
///
/// Used by tests and demos to exercise the retry and fallback paths that a
/// hosted spreadsheet-like store produces in practice.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    append_disabled: AtomicBool,
    failing_reads: AtomicUsize,
    failing_appends: AtomicUsize,
    failing_overwrites: AtomicUsize,
    append_calls: AtomicUsize,
    overwrite_calls: AtomicUsize,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that only offers whole-table replacement.
    pub fn without_append() -> Self {
        let store = Self::default();
        store.append_disabled.store(true, Ordering::SeqCst);
        store
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` appends fail.
    pub fn fail_next_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` overwrites fail.
    pub fn fail_next_overwrites(&self, n: usize) {
        self.failing_overwrites.store(n, Ordering::SeqCst);
    }

    /// Number of append attempts so far, failed ones included.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Number of overwrite attempts so far, failed ones included.
    pub fn overwrite_calls(&self) -> usize {
        self.overwrite_calls.load(Ordering::SeqCst)
    }

    /// Seed a table directly, bypassing failure injection.
    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.entry(table.to_string()).or_default().extend(rows);
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Row>>>, StorageError> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Database("table mutex poisoned".to_string()))
    }
}

/// Decrement a pending-failure counter, returning true if this call should fail.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn read_all(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        if take_failure(&self.failing_reads) {
            return Err(StorageError::Unavailable(format!("read of '{}' failed", table)));
        }
        Ok(self.tables()?.get(table).cloned().unwrap_or_default())
    }

    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.append_disabled.load(Ordering::SeqCst) {
            return Err(StorageError::Unsupported("append_rows".to_string()));
        }
        if take_failure(&self.failing_appends) {
            return Err(StorageError::Unavailable(format!("append to '{}' failed", table)));
        }
        self.tables()?
            .entry(table.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    async fn overwrite_all(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        self.overwrite_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_overwrites) {
            return Err(StorageError::Unavailable(format!(
                "overwrite of '{}' failed",
                table
            )));
        }
        self.tables()?.insert(table.to_string(), rows.to_vec());
        Ok(())
    }
}
