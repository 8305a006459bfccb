use super::machine::{Phase, RatingSession, SessionError};
use super::record::{CompletionRecord, Score};
use super::results::{ResultsError, ResultsStore, SubmitReceipt};
use crate::batch::{AssignError, BatchAssigner};
use crate::catalog::{Image, ImageCache};
use crate::error::ErrorKind;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no session for user '{0}'")]
    UnknownUser(String),

    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("user '{0}' has no active session, start one first")]
    Idle(String),

    #[error(transparent)]
    Assign(#[from] AssignError),

    #[error(transparent)]
    Session(SessionError),

    #[error("{error}")]
    Submit {
        error: ResultsError,
        /// Local CSV copy of the ratings, when one could be written.
        export_path: Option<PathBuf>,
    },

    #[error(transparent)]
    Export(ResultsError),
}

impl ManagerError {
    /// Taxonomy kind for store and catalog failures; `None` for caller mistakes.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ManagerError::Assign(e) => Some(e.kind()),
            ManagerError::Session(SessionError::Submit(e)) => Some(e.kind()),
            ManagerError::Submit { error, .. } => Some(error.kind()),
            ManagerError::Export(e) => Some(e.kind()),
            ManagerError::UnknownUser(_)
            | ManagerError::EmptyUserId
            | ManagerError::Idle(_)
            | ManagerError::Session(SessionError::InvalidTransition { .. }) => None,
        }
    }
}

/// What a client needs to render a user's session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub user_id: String,
    pub experience: String,
    pub session_id: Option<String>,
    pub batch_name: Option<String>,
    /// "idle", "rating", "completed" or "submitted".
    pub phase: &'static str,
    pub cursor: usize,
    pub total: usize,
    pub current_image: Option<Image>,
    pub ratings: Vec<CompletionRecord>,
}

struct UserSlot {
    user_id: String,
    experience: String,
    session: Option<RatingSession>,
}

impl UserSlot {
    fn view(&self) -> SessionView {
        match &self.session {
            None => SessionView {
                user_id: self.user_id.clone(),
                experience: self.experience.clone(),
                session_id: None,
                batch_name: None,
                phase: "idle",
                cursor: 0,
                total: 0,
                current_image: None,
                ratings: Vec::new(),
            },
            Some(session) => SessionView {
                user_id: self.user_id.clone(),
                experience: self.experience.clone(),
                session_id: Some(session.session_id().to_string()),
                batch_name: Some(session.batch_name().to_string()),
                phase: match session.phase() {
                    Phase::Rating { .. } => "rating",
                    Phase::Completed => "completed",
                    Phase::Submitted => "submitted",
                },
                cursor: session.cursor(),
                total: session.images().len(),
                current_image: session.current_image().cloned(),
                ratings: session.ratings().to_vec(),
            },
        }
    }
}

/// Process-wide registry of rating sessions, one per user id.
///
/// Calls for one user are serialized by that user's slot lock; different
/// users proceed concurrently. Nothing here takes another user's slot lock.
pub struct SessionManager {
    assigner: Arc<BatchAssigner>,
    results: Arc<ResultsStore>,
    cache: Arc<ImageCache>,
    export_dir: Option<PathBuf>,
    slots: RwLock<HashMap<String, Arc<Mutex<UserSlot>>>>,
    /// Image id to file name, for every image handed out so far.
    titles: StdRwLock<HashMap<String, String>>,
}

impl SessionManager {
    pub fn new(
        assigner: Arc<BatchAssigner>,
        cache: Arc<ImageCache>,
        export_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            results: Arc::clone(assigner.results()),
            assigner,
            cache,
            export_dir,
            slots: RwLock::new(HashMap::new()),
            titles: StdRwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn assigner(&self) -> &Arc<BatchAssigner> {
        &self.assigner
    }

    /// Resume the user's unfinished session, or assign a batch and begin a
    /// new one. A submitted session is replaced.
    pub async fn start(&self, user_id: &str, experience: &str) -> Result<SessionView, ManagerError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ManagerError::EmptyUserId);
        }

        let slot = {
            let mut slots = self.slots.write().await;
            Arc::clone(slots.entry(user_id.to_string()).or_insert_with(|| {
                Arc::new(Mutex::new(UserSlot {
                    user_id: user_id.to_string(),
                    experience: experience.to_string(),
                    session: None,
                }))
            }))
        };

        let mut slot = slot.lock().await;
        let resumable = slot
            .session
            .as_ref()
            .is_some_and(|session| session.phase() != Phase::Submitted);
        if resumable {
            tracing::debug!(user_id, "Resuming session");
            return Ok(slot.view());
        }

        slot.experience = experience.to_string();
        slot.session = None;
        self.ensure_session(&mut slot).await?;
        Ok(slot.view())
    }

    /// The user's session as it stands. An idle slot stays idle.
    pub async fn current(&self, user_id: &str) -> Result<SessionView, ManagerError> {
        let slot = self.slot(user_id).await?;
        let slot = slot.lock().await;
        Ok(slot.view())
    }

    pub async fn advance(&self, user_id: &str, score: Score) -> Result<SessionView, ManagerError> {
        let slot = self.slot(user_id).await?;
        let mut slot = slot.lock().await;
        let session = active(&mut slot)?;
        session.advance(score).map_err(ManagerError::Session)?;
        self.hint_next(session);
        Ok(slot.view())
    }

    pub async fn retreat(&self, user_id: &str) -> Result<SessionView, ManagerError> {
        let slot = self.slot(user_id).await?;
        let mut slot = slot.lock().await;
        active(&mut slot)?
            .retreat()
            .map_err(ManagerError::Session)?;
        Ok(slot.view())
    }

    /// Persist the finished session. When every submit strategy fails the
    /// ratings are also written as CSV to the export directory, if one is
    /// configured, and the session stays completed.
    pub async fn submit(
        &self,
        user_id: &str,
        feedback: Option<String>,
    ) -> Result<(SessionView, SubmitReceipt), ManagerError> {
        let slot = self.slot(user_id).await?;
        let mut slot = slot.lock().await;
        let session = active(&mut slot)?;

        match session.submit(feedback, &self.results).await {
            Ok(receipt) => Ok((slot.view(), receipt)),
            Err(SessionError::Submit(error)) => {
                let export_path = self.export_locally(session).await;
                Err(ManagerError::Submit { error, export_path })
            }
            Err(e) => Err(ManagerError::Session(e)),
        }
    }

    /// Drop the session but keep the user known; the next `start` assigns again.
    pub async fn reset(&self, user_id: &str) -> Result<SessionView, ManagerError> {
        let slot = self.slot(user_id).await?;
        let mut slot = slot.lock().await;
        slot.session = None;
        tracing::debug!(user_id, "Session reset");
        Ok(slot.view())
    }

    /// The session's ratings as a CSV document.
    pub async fn export(&self, user_id: &str) -> Result<String, ManagerError> {
        let slot = self.slot(user_id).await?;
        let slot = slot.lock().await;
        let records = slot
            .session
            .as_ref()
            .map(RatingSession::export_records)
            .unwrap_or_default();
        self.results
            .export_csv(&records)
            .map_err(ManagerError::Export)
    }

    pub async fn active_users(&self) -> usize {
        self.slots.read().await.len()
    }

    /// File name of an image handed out by any assignment so far.
    pub fn image_title(&self, image_id: &str) -> Option<String> {
        self.titles.read().ok()?.get(image_id).cloned()
    }

    async fn slot(&self, user_id: &str) -> Result<Arc<Mutex<UserSlot>>, ManagerError> {
        self.slots
            .read()
            .await
            .get(user_id.trim())
            .cloned()
            .ok_or_else(|| ManagerError::UnknownUser(user_id.to_string()))
    }

    async fn ensure_session(&self, slot: &mut UserSlot) -> Result<(), ManagerError> {
        if slot.session.is_some() {
            return Ok(());
        }

        let assignment = self.assigner.assign(&slot.user_id).await?;
        if let Ok(mut titles) = self.titles.write() {
            for image in &assignment.images {
                titles
                    .entry(image.id.clone())
                    .or_insert_with(|| image.title.clone());
            }
        }
        let session = RatingSession::new(
            slot.user_id.clone(),
            slot.experience.clone(),
            assignment.batch.name.clone(),
            assignment.images,
        );
        tracing::info!(
            user_id = %slot.user_id,
            batch = %session.batch_name(),
            images = session.images().len(),
            created = assignment.created,
            skipped = assignment.skipped.len(),
            "Session started"
        );
        if let Some(image) = session.current_image() {
            self.cache.prefetch_hint(&image.id);
        }
        self.hint_next(&session);
        slot.session = Some(session);
        Ok(())
    }

    fn hint_next(&self, session: &RatingSession) {
        if let Some(image) = session.next_image() {
            self.cache.prefetch_hint(&image.id);
        }
    }

    async fn export_locally(&self, session: &RatingSession) -> Option<PathBuf> {
        let dir = self.export_dir.as_deref()?;
        let csv = match self.results.export_csv(&session.export_records()) {
            Ok(csv) => csv,
            Err(e) => {
                tracing::error!(error = %e, "Failed to render local export");
                return None;
            }
        };
        match write_export(dir, session, &csv).await {
            Ok(path) => {
                tracing::warn!(
                    user_id = %session.user_id(),
                    path = %path.display(),
                    "Submit failed, ratings exported locally"
                );
                Some(path)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %session.user_id(),
                    dir = %dir.display(),
                    error = %e,
                    "Failed to write local export"
                );
                None
            }
        }
    }
}

fn active(slot: &mut UserSlot) -> Result<&mut RatingSession, ManagerError> {
    match slot.session.as_mut() {
        Some(session) => Ok(session),
        None => Err(ManagerError::Idle(slot.user_id.clone())),
    }
}

/// `user_id` with everything outside `[A-Za-z0-9_-]` replaced by `_`.
pub fn file_safe_id(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn write_export(dir: &Path, session: &RatingSession, csv: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "{}_{}_{}.csv",
        file_safe_id(session.user_id()),
        session.batch_name(),
        session.session_id()
    ));
    tokio::fs::write(&path, csv).await?;
    Ok(path)
}
