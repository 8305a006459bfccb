use crate::storage::Row;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const COL_USER_ID: &str = "id_utente";
pub const COL_EXPERIENCE: &str = "esperienza";
pub const COL_IMAGE_TITLE: &str = "nome_immagine";
pub const COL_DATASET: &str = "dataset";
pub const COL_SCORE: &str = "score";
pub const COL_BATCH_NAME: &str = "file_txt_assegnato";
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_FEEDBACK: &str = "feedback";

/// Column order of the results table and of CSV exports.
pub const RESULT_COLUMNS: [&str; 8] = [
    COL_USER_ID,
    COL_EXPERIENCE,
    COL_IMAGE_TITLE,
    COL_DATASET,
    COL_SCORE,
    COL_BATCH_NAME,
    COL_TIMESTAMP,
    COL_FEEDBACK,
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A quality score, 1 (worst) to 10 (best).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: i64) -> Result<Self, ScoreError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ScoreError(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Score {
    type Error = ScoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> u8 {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("score {0} is outside 1..=10")]
pub struct ScoreError(pub i64);

/// One rating of one image by one user, as captured in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub user_id: String,
    pub batch_name: String,
    pub image_id: String,
    pub image_title: String,
    pub dataset: String,
    pub score: Score,
    pub experience: String,
    pub timestamp: DateTime<Utc>,
    pub feedback: Option<String>,
}

impl CompletionRecord {
    /// The persisted projection of this record, timestamp rendered at `offset`.
    pub fn to_rating_row(&self, offset: &FixedOffset) -> RatingRow {
        RatingRow {
            user_id: self.user_id.clone(),
            experience: self.experience.clone(),
            image_title: self.image_title.clone(),
            dataset: self.dataset.clone(),
            score: self.score.to_string(),
            batch_name: self.batch_name.clone(),
            timestamp: format_timestamp(&self.timestamp, offset),
            feedback: self.feedback.clone().unwrap_or_default(),
        }
    }
}

/// A row of the results table. The image id is not persisted, so history
/// read back from the store comes in this form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RatingRow {
    pub user_id: String,
    pub experience: String,
    pub image_title: String,
    pub dataset: String,
    pub score: String,
    pub batch_name: String,
    pub timestamp: String,
    pub feedback: String,
}

impl RatingRow {
    pub fn to_row(&self) -> Row {
        RESULT_COLUMNS
            .iter()
            .zip(self.values())
            .map(|(column, value)| (column.to_string(), value.to_string()))
            .collect()
    }

    /// Missing columns read as empty strings.
    pub fn from_row(row: &Row) -> Self {
        let get = |column: &str| row.get(column).cloned().unwrap_or_default();
        Self {
            user_id: get(COL_USER_ID),
            experience: get(COL_EXPERIENCE),
            image_title: get(COL_IMAGE_TITLE),
            dataset: get(COL_DATASET),
            score: get(COL_SCORE),
            batch_name: get(COL_BATCH_NAME),
            timestamp: get(COL_TIMESTAMP),
            feedback: get(COL_FEEDBACK),
        }
    }

    /// Cell values in [`RESULT_COLUMNS`] order.
    pub fn values(&self) -> [&str; 8] {
        [
            self.user_id.as_str(),
            self.experience.as_str(),
            self.image_title.as_str(),
            self.dataset.as_str(),
            self.score.as_str(),
            self.batch_name.as_str(),
            self.timestamp.as_str(),
            self.feedback.as_str(),
        ]
    }
}

pub fn format_timestamp(at: &DateTime<Utc>, offset: &FixedOffset) -> String {
    at.with_timezone(offset).format(TIMESTAMP_FORMAT).to_string()
}
