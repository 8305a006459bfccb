use super::record::{CompletionRecord, Score};
use super::results::{ResultsError, ResultsStore, SubmitReceipt};
use crate::catalog::Image;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Where a session stands. Derived from the cursor and the submitted flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    Rating { cursor: usize },
    Completed,
    Submitted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Rating { cursor } => write!(f, "rating({})", cursor),
            Phase::Completed => f.write_str("completed"),
            Phase::Submitted => f.write_str("submitted"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {operation} while {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: Phase,
    },

    #[error(transparent)]
    Submit(#[from] ResultsError),
}

/// One user's pass over one batch. Nothing here touches shared state until
/// `submit`, so abandoning a session has no side effects.
#[derive(Debug, Clone)]
pub struct RatingSession {
    session_id: Uuid,
    user_id: String,
    experience: String,
    batch_name: String,
    images: Vec<Image>,
    ratings: Vec<CompletionRecord>,
    feedback: Option<String>,
    submitted: bool,
}

impl RatingSession {
    pub fn new(user_id: String, experience: String, batch_name: String, images: Vec<Image>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            experience,
            batch_name,
            images,
            ratings: Vec::new(),
            feedback: None,
            submitted: false,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn experience(&self) -> &str {
        &self.experience
    }

    pub fn batch_name(&self) -> &str {
        &self.batch_name
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn ratings(&self) -> &[CompletionRecord] {
        &self.ratings
    }

    /// Index of the next image to rate; equals the image count once completed.
    pub fn cursor(&self) -> usize {
        self.ratings.len()
    }

    pub fn phase(&self) -> Phase {
        if self.submitted {
            Phase::Submitted
        } else if self.cursor() >= self.images.len() {
            Phase::Completed
        } else {
            Phase::Rating {
                cursor: self.cursor(),
            }
        }
    }

    /// The image awaiting a score, if any.
    pub fn current_image(&self) -> Option<&Image> {
        match self.phase() {
            Phase::Rating { cursor } => self.images.get(cursor),
            _ => None,
        }
    }

    /// The image after the current one.
    pub fn next_image(&self) -> Option<&Image> {
        match self.phase() {
            Phase::Rating { cursor } => self.images.get(cursor + 1),
            _ => None,
        }
    }

    pub fn advance(&mut self, score: Score) -> Result<Phase, SessionError> {
        self.advance_at(score, Utc::now())
    }

    /// Score the current image with an explicit capture time.
    pub fn advance_at(&mut self, score: Score, at: DateTime<Utc>) -> Result<Phase, SessionError> {
        let image = match self.phase() {
            Phase::Rating { cursor } => &self.images[cursor],
            phase => {
                return Err(SessionError::InvalidTransition {
                    operation: "advance",
                    phase,
                })
            }
        };

        let record = CompletionRecord {
            user_id: self.user_id.clone(),
            batch_name: self.batch_name.clone(),
            image_id: image.id.clone(),
            image_title: image.title.clone(),
            dataset: image.dataset.clone(),
            score,
            experience: self.experience.clone(),
            timestamp: at,
            feedback: None,
        };
        self.ratings.push(record);
        Ok(self.phase())
    }

    /// Undo the most recent score.
    pub fn retreat(&mut self) -> Result<Phase, SessionError> {
        let phase = self.phase();
        if self.submitted || self.ratings.is_empty() {
            return Err(SessionError::InvalidTransition {
                operation: "retreat",
                phase,
            });
        }
        self.ratings.pop();
        Ok(self.phase())
    }

    /// The ratings as they are (or would be) persisted, feedback attached.
    pub fn export_records(&self) -> Vec<CompletionRecord> {
        self.ratings
            .iter()
            .cloned()
            .map(|mut record| {
                record.feedback = self.feedback.clone();
                record
            })
            .collect()
    }

    /// Persist every rating in one append. On failure the session stays
    /// completed and can be submitted again or exported.
    pub async fn submit(
        &mut self,
        feedback: Option<String>,
        results: &ResultsStore,
    ) -> Result<SubmitReceipt, SessionError> {
        let phase = self.phase();
        if phase != Phase::Completed {
            return Err(SessionError::InvalidTransition {
                operation: "submit",
                phase,
            });
        }

        self.feedback = feedback
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let records = self.export_records();
        let receipt = results.append(&records).await?;

        self.ratings = records;
        self.submitted = true;
        tracing::info!(
            user_id = %self.user_id,
            batch = %self.batch_name,
            session_id = %self.session_id,
            rows = receipt.rows,
            strategy = receipt.strategy.as_str(),
            "Session submitted"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubmitStrategy;
    use crate::storage::MemoryTableStore;
    use chrono::{FixedOffset, TimeZone};
    use std::sync::Arc;

    fn images(n: usize) -> Vec<Image> {
        (0..n)
            .map(|i| Image {
                id: format!("id{}", i),
                title: format!("img_{}.png", i),
                dataset: "Dataset 1".to_string(),
            })
            .collect()
    }

    fn session(n: usize) -> RatingSession {
        RatingSession::new(
            "anna".to_string(),
            "resident".to_string(),
            "batch_01".to_string(),
            images(n),
        )
    }

    fn score(v: i64) -> Score {
        Score::new(v).unwrap()
    }

    fn results(store: Arc<MemoryTableStore>) -> ResultsStore {
        ResultsStore::new(
            store,
            "results",
            vec![SubmitStrategy::AppendRows],
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    #[test]
    fn test_advance_to_completion() {
        let mut s = session(2);
        assert_eq!(s.phase(), Phase::Rating { cursor: 0 });
        assert_eq!(s.current_image().unwrap().id, "id0");
        assert_eq!(s.next_image().unwrap().id, "id1");

        assert_eq!(s.advance(score(4)).unwrap(), Phase::Rating { cursor: 1 });
        assert!(s.next_image().is_none());
        assert_eq!(s.advance(score(6)).unwrap(), Phase::Completed);
        assert!(s.current_image().is_none());

        let err = s.advance(score(1)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                operation: "advance",
                phase: Phase::Completed
            }
        ));

        let record = &s.ratings()[1];
        assert_eq!(record.image_id, "id1");
        assert_eq!(record.batch_name, "batch_01");
        assert_eq!(record.experience, "resident");
    }

    #[test]
    fn test_retreat_at_start_is_rejected() {
        let mut s = session(3);
        assert!(s.retreat().is_err());
    }

    #[test]
    fn test_retreat_is_exact_undo() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut s = session(3);
        s.advance_at(score(7), at).unwrap();
        let before = s.ratings().to_vec();
        let before_phase = s.phase();

        s.advance_at(score(3), at).unwrap();
        s.retreat().unwrap();
        assert_eq!(s.ratings(), before.as_slice());
        assert_eq!(s.phase(), before_phase);
    }

    #[test]
    fn test_retreat_from_completed() {
        let mut s = session(1);
        s.advance(score(5)).unwrap();
        assert_eq!(s.retreat().unwrap(), Phase::Rating { cursor: 0 });
    }

    #[tokio::test]
    async fn test_submit_only_when_completed() {
        let store = Arc::new(MemoryTableStore::new());
        let results = results(store.clone());
        let mut s = session(2);
        s.advance(score(5)).unwrap();

        let err = s.submit(None, &results).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_attaches_feedback_and_locks_session() {
        let store = Arc::new(MemoryTableStore::new());
        let results = results(store.clone());
        let mut s = session(2);
        s.advance(score(5)).unwrap();
        s.advance(score(8)).unwrap();

        let receipt = s
            .submit(Some("  too dark  ".to_string()), &results)
            .await
            .unwrap();
        assert_eq!(receipt.rows, 2);
        assert_eq!(s.phase(), Phase::Submitted);
        assert!(s
            .ratings()
            .iter()
            .all(|r| r.feedback.as_deref() == Some("too dark")));

        assert!(s.retreat().is_err());
        assert!(s.advance(score(2)).is_err());
        assert!(s.submit(None, &results).await.is_err());
        assert_eq!(store.append_calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_feedback_is_dropped() {
        let results = results(Arc::new(MemoryTableStore::new()));
        let mut s = session(1);
        s.advance(score(9)).unwrap();
        s.submit(Some("   ".to_string()), &results).await.unwrap();
        assert_eq!(s.ratings()[0].feedback, None);
    }

    #[tokio::test]
    async fn test_failed_submit_stays_completed() {
        let store = Arc::new(MemoryTableStore::new());
        let results = results(store.clone());
        store.fail_next_appends(1);
        let mut s = session(1);
        s.advance(score(9)).unwrap();

        let err = s.submit(Some("note".to_string()), &results).await.unwrap_err();
        assert!(matches!(err, SessionError::Submit(ResultsError::WriteFailed(_))));
        assert_eq!(s.phase(), Phase::Completed);
        assert_eq!(s.export_records()[0].feedback.as_deref(), Some("note"));

        s.submit(Some("note".to_string()), &results).await.unwrap();
        assert_eq!(results.load_history().await.unwrap().len(), 1);
    }
}
