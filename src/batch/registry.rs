use super::model::Batch;
use crate::error::ErrorKind;
use crate::storage::{StorageError, TableStore};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read batch registry: {0}")]
    Read(#[source] StorageError),

    #[error("failed to write batch registry: {0}")]
    Write(#[source] StorageError),

    #[error("batch name '{0}' is already registered")]
    NameTaken(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Read(_) => ErrorKind::StoreUnavailable,
            RegistryError::Write(_) | RegistryError::NameTaken(_) => {
                ErrorKind::RegistryWriteFailed
            }
        }
    }
}

/// Durable, append-only list of batches kept in one table of the shared store.
///
/// The batch table only supports whole-table replacement, so an append is
/// read everything, add one row, write everything back. Two writers doing
/// this at the same time can lose one of the new rows.
#[derive(Clone)]
pub struct BatchRegistry {
    store: Arc<dyn TableStore>,
    table: String,
}

impl BatchRegistry {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Every registered batch, in registry order.
    pub async fn list_batches(&self) -> Result<Vec<Batch>, RegistryError> {
        let rows = self
            .store
            .read_all(&self.table)
            .await
            .map_err(RegistryError::Read)?;

        let mut batches = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            match Batch::from_row(row) {
                Some(batch) => batches.push(batch),
                None => tracing::warn!(
                    table = %self.table,
                    row = index,
                    "Skipping batch row without a name"
                ),
            }
        }
        Ok(batches)
    }

    /// Add a batch at the end of the registry.
    ///
    /// Fails with `NameTaken` if the current table already holds a batch of
    /// the same name, which happens when another writer got there first.
    pub async fn append_batch(&self, batch: &Batch) -> Result<(), RegistryError> {
        let mut rows = self
            .store
            .read_all(&self.table)
            .await
            .map_err(RegistryError::Read)?;

        let taken = rows
            .iter()
            .filter_map(Batch::from_row)
            .any(|existing| existing.name == batch.name);
        if taken {
            return Err(RegistryError::NameTaken(batch.name.clone()));
        }

        rows.push(batch.to_row());
        self.store
            .overwrite_all(&self.table, &rows)
            .await
            .map_err(RegistryError::Write)?;

        tracing::info!(
            batch = %batch.name,
            images = batch.image_ids.len(),
            total_batches = rows.len(),
            "Registered new batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTableStore;
    use chrono::Utc;

    fn batch(name: &str, ids: &[&str]) -> Batch {
        Batch::new(
            name.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_append_then_list_preserves_order() {
        let store = Arc::new(MemoryTableStore::new());
        let registry = BatchRegistry::new(store.clone(), "batches");

        registry.append_batch(&batch("batch_01", &["a", "b"])).await.unwrap();
        registry.append_batch(&batch("batch_02", &["c", "d"])).await.unwrap();

        let batches = registry.list_batches().await.unwrap();
        let names: Vec<&str> = batches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["batch_01", "batch_02"]);
        assert_eq!(batches[1].image_ids, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(store.overwrite_calls(), 2);
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let registry = BatchRegistry::new(Arc::new(MemoryTableStore::new()), "batches");
        registry.append_batch(&batch("batch_01", &["a"])).await.unwrap();

        let err = registry
            .append_batch(&batch("batch_01", &["z"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NameTaken(_)));
        assert_eq!(err.kind(), ErrorKind::RegistryWriteFailed);
        assert_eq!(registry.list_batches().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_registry_unchanged() {
        let store = Arc::new(MemoryTableStore::new());
        let registry = BatchRegistry::new(store.clone(), "batches");
        store.fail_next_overwrites(1);

        let err = registry
            .append_batch(&batch("batch_01", &["a"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegistryWriteFailed);
        assert!(registry.list_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_kind() {
        let store = Arc::new(MemoryTableStore::new());
        let registry = BatchRegistry::new(store.clone(), "batches");
        store.fail_next_reads(1);
        let err = registry.list_batches().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[tokio::test]
    async fn test_nameless_rows_are_skipped() {
        let store = Arc::new(MemoryTableStore::new());
        let mut junk = crate::storage::Row::new();
        junk.insert("image_ids".to_string(), "a".to_string());
        store.insert_rows("batches", vec![junk, batch("batch_01", &["b"]).to_row()]);

        let registry = BatchRegistry::new(store, "batches");
        let batches = registry.list_batches().await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].name, "batch_01");
    }
}
