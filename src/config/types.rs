use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    pub web: WebConfig,
    #[serde(default = "default_guidelines")]
    pub guidelines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory whose immediate sub-directories are the datasets
    pub root: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

fn default_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "bmp", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cache_entries() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    #[serde(default = "default_users_per_group")]
    pub users_per_group: usize,
    #[serde(default = "default_target_per_dataset")]
    pub target_per_dataset: usize,
    /// Total images per batch. Defaults to `target_per_dataset` times the
    /// number of datasets found when the batch is created.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            users_per_group: default_users_per_group(),
            target_per_dataset: default_target_per_dataset(),
            batch_size: None,
            seed: None,
        }
    }
}

fn default_users_per_group() -> usize {
    3
}

fn default_target_per_dataset() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_batches_table")]
    pub batches_table: String,
    #[serde(default = "default_results_table")]
    pub results_table: String,
    #[serde(default = "default_submit_strategies")]
    pub submit_strategies: Vec<SubmitStrategy>,
}

fn default_batches_table() -> String {
    "batches".to_string()
}

fn default_results_table() -> String {
    "results".to_string()
}

pub fn default_submit_strategies() -> Vec<SubmitStrategy> {
    vec![SubmitStrategy::AppendRows, SubmitStrategy::OverwriteAll]
}

/// Ways of getting a finished session's rows into the results table,
/// tried in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStrategy {
    /// Native append without reading the table first
    AppendRows,
    /// Read everything, add the new rows, write everything back
    OverwriteAll,
}

impl SubmitStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitStrategy::AppendRows => "append_rows",
            SubmitStrategy::OverwriteAll => "overwrite_all",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Fixed offset used when rendering timestamps, e.g. "+01:00". UTC when absent.
    #[serde(default)]
    pub utc_offset: Option<String>,
    /// Where CSV exports are written when every submit strategy fails
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

impl ResultsConfig {
    /// The reference offset for timestamps, falling back to UTC.
    pub fn offset(&self) -> FixedOffset {
        self.utc_offset
            .as_deref()
            .and_then(|s| s.parse::<FixedOffset>().ok())
            .unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub listen: String,
}

pub fn default_guidelines() -> Vec<String> {
    [
        "Brightness: the image is well lit, without overly dark or overexposed areas.",
        "Sharpness: mucosal detail is clearly visible, with no motion blur.",
        "Natural colours: no unnatural colour casts.",
        "No artefacts: free of digital artefacts or sudden-movement disturbance.",
        "Composition: the region of interest is centred and visible.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
