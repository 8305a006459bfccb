use super::traits::{Row, StorageError, TableStore};
use async_trait::async_trait;
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        std::process::Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract PID from DuckDB lock error message, formatted as "... (PID 12345) ..."
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

/// Remove the WAL and lock files a dead process left behind
fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let path = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!("Removed stale {} file: {}", suffix, path.display());
        }
    }
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

/// DuckDB-backed table store.
///
/// All logical tables share one physical table; each row is kept as a JSON
/// object next to its table name and insertion sequence number.
pub struct DuckDbTableStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbTableStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Unavailable(format!(
                        "cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        match Connection::open(path) {
            Ok(conn) => Ok(Self::from_connection(conn)),
            Err(e) => {
                let error_msg = e.to_string();
                if !error_msg.contains("Could not set lock") {
                    return Err(e.into());
                }

                tracing::warn!("Database lock detected: {}", error_msg);
                let Some(pid) = extract_pid_from_lock_error(&error_msg) else {
                    return Err(e.into());
                };
                if is_process_running(pid) {
                    tracing::error!("Process {} is still running, cannot acquire lock", pid);
                    return Err(e.into());
                }

                tracing::warn!("Process {} is not running, removing stale lock files", pid);
                if let Err(io_err) = remove_lock_files(path) {
                    tracing::error!("Failed to remove lock files: {}", io_err);
                    return Err(e.into());
                }

                tracing::info!("Retrying database connection after removing stale locks");
                Ok(Self::from_connection(Connection::open(path)?))
            }
        }
    }

    /// In-memory database, mostly for tests
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn encode_rows(rows: &[Row]) -> Result<Vec<String>, StorageError> {
        rows.iter()
            .map(|row| serde_json::to_string(row).map_err(StorageError::from))
            .collect()
    }
}

fn insert_encoded(
    conn: &Connection,
    table: &str,
    first_seq: i64,
    encoded: &[String],
) -> Result<(), StorageError> {
    let mut stmt =
        conn.prepare("INSERT INTO table_rows (table_name, seq, row_data) VALUES (?, ?, ?)")?;
    for (i, data) in encoded.iter().enumerate() {
        stmt.execute(duckdb::params![table, first_seq + i as i64, data])?;
    }
    Ok(())
}

#[async_trait]
impl TableStore for DuckDbTableStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS table_rows (
                    table_name VARCHAR NOT NULL,
                    seq BIGINT NOT NULL,
                    row_data VARCHAR NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_table_rows_table ON table_rows(table_name)",
                [],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn read_all(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        let conn = self.conn.clone();
        let table = table.to_string();

        let encoded = tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT row_data FROM table_rows WHERE table_name = ? ORDER BY seq",
            )?;
            let rows = stmt.query_map(duckdb::params![table], |row| row.get::<_, String>(0))?;

            let mut encoded = Vec::new();
            for row in rows {
                encoded.push(row?);
            }
            Ok::<Vec<String>, StorageError>(encoded)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))??;

        encoded
            .iter()
            .map(|data| serde_json::from_str::<Row>(data).map_err(StorageError::from))
            .collect()
    }

    async fn append_rows(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let table = table.to_string();
        let encoded = Self::encode_rows(rows)?;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            let next_seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM table_rows WHERE table_name = ?",
                duckdb::params![table],
                |row| row.get(0),
            )?;
            insert_encoded(&tx, &table, next_seq, &encoded)?;
            tx.commit()?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn overwrite_all(&self, table: &str, rows: &[Row]) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let table = table.to_string();
        let encoded = Self::encode_rows(rows)?;

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM table_rows WHERE table_name = ?",
                duckdb::params![table],
            )?;
            insert_encoded(&tx, &table, 0, &encoded)?;
            tx.commit()?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> DuckDbTableStore {
        let store = DuckDbTableStore::in_memory().unwrap();
        store.init_schema().await.unwrap();
        store
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let store = DuckDbTableStore::in_memory().unwrap();
        assert!(store.init_schema().await.is_ok());
        assert!(store.init_schema().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_table_reads_empty() {
        let store = setup_store().await;
        assert!(store.read_all("batches").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = setup_store().await;
        store
            .append_rows("results", &[row(&[("score", "7")]), row(&[("score", "3")])])
            .await
            .unwrap();
        store
            .append_rows("results", &[row(&[("score", "9")])])
            .await
            .unwrap();

        let rows = store.read_all("results").await.unwrap();
        let scores: Vec<&str> = rows.iter().map(|r| r["score"].as_str()).collect();
        assert_eq!(scores, vec!["7", "3", "9"]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_only_target_table() {
        let store = setup_store().await;
        store
            .append_rows("batches", &[row(&[("batch_name", "batch_01")])])
            .await
            .unwrap();
        store
            .append_rows("results", &[row(&[("score", "5")])])
            .await
            .unwrap();

        store
            .overwrite_all(
                "batches",
                &[
                    row(&[("batch_name", "batch_01")]),
                    row(&[("batch_name", "batch_02")]),
                ],
            )
            .await
            .unwrap();

        let batches = store.read_all("batches").await.unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1]["batch_name"], "batch_02");
        assert_eq!(store.read_all("results").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_after_overwrite_continues_sequence() {
        let store = setup_store().await;
        store
            .overwrite_all("batches", &[row(&[("n", "1")]), row(&[("n", "2")])])
            .await
            .unwrap();
        store.append_rows("batches", &[row(&[("n", "3")])]).await.unwrap();

        let rows = store.read_all("batches").await.unwrap();
        let ns: Vec<&str> = rows.iter().map(|r| r["n"].as_str()).collect();
        assert_eq!(ns, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("imgrate.duckdb");
        {
            let store = DuckDbTableStore::new(&path).unwrap();
            store.init_schema().await.unwrap();
            store
                .append_rows("results", &[row(&[("id_utente", "anna")])])
                .await
                .unwrap();
        }

        let store = DuckDbTableStore::new(&path).unwrap();
        store.init_schema().await.unwrap();
        let rows = store.read_all("results").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id_utente"], "anna");
    }

    #[test]
    fn test_extract_pid_from_lock_error() {
        let msg = "IO Error: Could not set lock on file: Conflicting lock is held in /usr/bin/imgrate (PID 4242) by user";
        assert_eq!(extract_pid_from_lock_error(msg), Some(4242));
        assert_eq!(extract_pid_from_lock_error("no pid here"), None);
        assert_eq!(extract_pid_from_lock_error("(PID abc)"), None);
    }

    #[test]
    #[cfg(unix)]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
    }
}
