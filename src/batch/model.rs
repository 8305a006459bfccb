use crate::storage::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const COL_BATCH_NAME: &str = "batch_name";
pub const COL_IMAGE_IDS: &str = "image_ids";

const NAME_PREFIX: &str = "batch_";
const ID_SEPARATOR: char = ',';

/// A named, ordered set of image ids handed out as a unit to raters.
///
/// Batches are never modified once appended to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    pub image_ids: Vec<String>,
    /// Only known for batches created by this process; the stored row has
    /// no column for it.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(name: String, image_ids: Vec<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name,
            image_ids,
            created_at: Some(created_at),
        }
    }

    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(COL_BATCH_NAME.to_string(), self.name.clone());
        row.insert(COL_IMAGE_IDS.to_string(), join_image_ids(&self.image_ids));
        row
    }

    /// Parse a stored row. Returns `None` when the row has no usable name.
    pub fn from_row(row: &Row) -> Option<Self> {
        let name = row.get(COL_BATCH_NAME)?;
        if name.is_empty() {
            return None;
        }
        let ids = row.get(COL_IMAGE_IDS).map(String::as_str).unwrap_or("");
        Some(Self {
            name: name.clone(),
            image_ids: split_image_ids(ids),
            created_at: None,
        })
    }

    /// The numeric suffix of the batch name, if it follows `batch_NN`.
    pub fn number(&self) -> Option<u32> {
        batch_number(&self.name)
    }
}

/// Comma-join image ids. Ids must not be empty or contain commas.
pub fn join_image_ids(ids: &[String]) -> String {
    ids.join(&ID_SEPARATOR.to_string())
}

/// Inverse of [`join_image_ids`]; the empty string is the empty list.
pub fn split_image_ids(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(ID_SEPARATOR).map(str::to_string).collect()
}

pub fn batch_number(name: &str) -> Option<u32> {
    name.strip_prefix(NAME_PREFIX)?.parse().ok()
}

/// One past the highest numbered batch, zero-padded to two digits.
pub fn next_batch_name(batches: &[Batch]) -> String {
    let next = batches
        .iter()
        .filter_map(Batch::number)
        .max()
        .map(|n| n + 1)
        .unwrap_or(1);
    format!("{}{:02}", NAME_PREFIX, next)
}
