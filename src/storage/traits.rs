use async_trait::async_trait;
use std::collections::BTreeMap;

/// One row of a table: column name to cell text.
pub type Row = BTreeMap<String, String>;

/// A shared tabular store holding named tables of string rows.
///
/// There is no transactional isolation between callers: a read followed by
/// an overwrite can lose rows written in between by someone else.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Every row of `table` in insertion order. A table never written reads as empty.
    async fn read_all(&self, table: &str) -> Result<Vec<Row>, StorageError>;

    /// Append rows without reading the table first.
    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<(), StorageError>;

    /// Replace the whole content of `table`.
    async fn overwrite_all(&self, table: &str, rows: &[Row]) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation not supported by this store: {0}")]
    Unsupported(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
