use super::record::{CompletionRecord, RatingRow, RESULT_COLUMNS};
use crate::config::SubmitStrategy;
use crate::error::ErrorKind;
use crate::storage::{Row, StorageError, TableStore};
use chrono::FixedOffset;
use serde::Serialize;
use std::sync::Arc;

/// One failed attempt in the submit strategy chain.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyFailure {
    pub strategy: SubmitStrategy,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("failed to read results: {0}")]
    Read(#[source] StorageError),

    #[error("every submit strategy failed: {}", describe_failures(.0))]
    WriteFailed(Vec<StrategyFailure>),

    #[error("failed to export results: {0}")]
    Export(String),
}

impl ResultsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResultsError::Read(_) => ErrorKind::StoreUnavailable,
            ResultsError::WriteFailed(_) | ResultsError::Export(_) => {
                ErrorKind::ResultsWriteFailed
            }
        }
    }
}

fn describe_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.strategy.as_str(), f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Which strategy stored a submission, and how many rows it wrote.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub strategy: SubmitStrategy,
    pub rows: usize,
}

/// Append-only record of ratings, stored in one table of the shared store.
pub struct ResultsStore {
    store: Arc<dyn TableStore>,
    table: String,
    strategies: Vec<SubmitStrategy>,
    offset: FixedOffset,
}

impl ResultsStore {
    pub fn new(
        store: Arc<dyn TableStore>,
        table: impl Into<String>,
        strategies: Vec<SubmitStrategy>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            strategies,
            offset,
        }
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    /// Every persisted rating row, across all users.
    pub async fn load_history(&self) -> Result<Vec<RatingRow>, ResultsError> {
        let rows = self
            .store
            .read_all(&self.table)
            .await
            .map_err(ResultsError::Read)?;
        Ok(rows.iter().map(RatingRow::from_row).collect())
    }

    /// Store `records` in one write, trying each configured strategy in order.
    ///
    /// A strategy either stores every row or none, so a later strategy (or a
    /// later call) never duplicates rows from a failed attempt.
    pub async fn append(&self, records: &[CompletionRecord]) -> Result<SubmitReceipt, ResultsError> {
        let rows: Vec<Row> = records
            .iter()
            .map(|record| record.to_rating_row(&self.offset).to_row())
            .collect();

        let mut failures = Vec::new();
        for &strategy in &self.strategies {
            match self.write_with(strategy, &rows).await {
                Ok(()) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            strategy = strategy.as_str(),
                            failed_attempts = failures.len(),
                            "Results stored by fallback strategy"
                        );
                    }
                    return Ok(SubmitReceipt {
                        strategy,
                        rows: rows.len(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.as_str(),
                        table = %self.table,
                        error = %e,
                        "Submit strategy failed"
                    );
                    failures.push(StrategyFailure {
                        strategy,
                        kind: ErrorKind::ResultsWriteFailed,
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(ResultsError::WriteFailed(failures))
    }

    async fn write_with(&self, strategy: SubmitStrategy, rows: &[Row]) -> Result<(), StorageError> {
        match strategy {
            SubmitStrategy::AppendRows => self.store.append_rows(&self.table, rows).await,
            SubmitStrategy::OverwriteAll => {
                let mut all = self.store.read_all(&self.table).await?;
                all.extend(rows.iter().cloned());
                self.store.overwrite_all(&self.table, &all).await
            }
        }
    }

    /// Render records as a CSV document: header plus one line per record.
    pub fn export_csv(&self, records: &[CompletionRecord]) -> Result<String, ResultsError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(RESULT_COLUMNS)
            .map_err(|e| ResultsError::Export(e.to_string()))?;
        for record in records {
            writer
                .write_record(record.to_rating_row(&self.offset).values())
                .map_err(|e| ResultsError::Export(e.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ResultsError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| ResultsError::Export(e.to_string()))
    }
}
