use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::batch::BatchSummary;
use crate::catalog::CatalogError;
use crate::error::ErrorKind;
use crate::session::{
    file_safe_id, ManagerError, Score, SessionError, SessionManager, SessionView, SubmitReceipt,
};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub guidelines: Arc<Vec<String>>,
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user_id: String,
    #[serde(default)]
    pub experience: String,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub score: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub session: SessionView,
    pub receipt: SubmitReceipt,
}

#[derive(Debug, Serialize)]
pub struct GuidelinesResponse {
    pub guidelines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchesResponse {
    pub batches: Vec<BatchSummary>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// A store or catalog failure from the error taxonomy.
    Unavailable {
        kind: ErrorKind,
        message: String,
        export_path: Option<String>,
    },
    Internal(String),
}

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        let message = err.to_string();
        match err {
            ManagerError::UnknownUser(_) => ApiError::NotFound(message),
            ManagerError::EmptyUserId => ApiError::BadRequest(message),
            ManagerError::Idle(_)
            | ManagerError::Session(SessionError::InvalidTransition { .. }) => {
                ApiError::Conflict(message)
            }
            ManagerError::Submit {
                ref error,
                ref export_path,
            } => ApiError::Unavailable {
                kind: error.kind(),
                message,
                export_path: export_path.as_ref().map(|p| p.display().to_string()),
            },
            other => match other.kind() {
                Some(kind) => ApiError::Unavailable {
                    kind,
                    message,
                    export_path: None,
                },
                None => ApiError::Internal(message),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg, "kind": null, "retryable": false }),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": msg, "kind": null, "retryable": false }),
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": msg, "kind": null, "retryable": false }),
            ),
            ApiError::Unavailable {
                kind,
                message,
                export_path,
            } => {
                let status = if kind.is_retryable() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::UNPROCESSABLE_ENTITY
                };
                (
                    status,
                    serde_json::json!({
                        "error": message,
                        "kind": kind,
                        "retryable": kind.is_retryable(),
                        "export_path": export_path,
                    }),
                )
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": msg, "kind": null, "retryable": false }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/guidelines
pub async fn get_guidelines(State(state): State<AppState>) -> Json<GuidelinesResponse> {
    Json(GuidelinesResponse {
        guidelines: state.guidelines.as_ref().clone(),
    })
}

/// POST /api/sessions
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let view = state
        .sessions
        .start(&request.user_id, request.experience.trim())
        .await?;
    Ok(Json(view))
}

/// GET /api/sessions/:user_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.sessions.current(&user_id).await?))
}

/// POST /api/sessions/:user_id/advance
pub async fn advance_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<AdvanceRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let score = Score::new(request.score).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.sessions.advance(&user_id, score).await?))
}

/// POST /api/sessions/:user_id/retreat
pub async fn retreat_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.sessions.retreat(&user_id).await?))
}

/// POST /api/sessions/:user_id/submit
pub async fn submit_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    request: Option<Json<SubmitRequest>>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let (session, receipt) = state.sessions.submit(&user_id, request.feedback).await?;
    Ok(Json(SubmitResponse { session, receipt }))
}

/// POST /api/sessions/:user_id/reset
pub async fn reset_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.sessions.reset(&user_id).await?))
}

/// GET /api/sessions/:user_id/export
pub async fn export_session(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let csv = state.sessions.export(&user_id).await?;
    let disposition = format!("attachment; filename=\"ratings_{}.csv\"", file_safe_id(&user_id));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

/// GET /api/images/:image_id
pub async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state
        .sessions
        .cache()
        .get(&image_id)
        .await
        .map_err(|e| match e {
            CatalogError::NotFound(_) => ApiError::NotFound(e.to_string()),
            CatalogError::Unavailable(_) => ApiError::Unavailable {
                kind: e.kind(),
                message: e.to_string(),
                export_path: None,
            },
        })?;

    let content_type = match state.sessions.image_title(&image_id) {
        Some(title) => content_type_for(&title),
        None => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes.to_vec()).into_response())
}

/// GET /api/batches
pub async fn list_batches(State(state): State<AppState>) -> Result<Json<BatchesResponse>, ApiError> {
    let batches = state
        .sessions
        .assigner()
        .summaries()
        .await
        .map_err(|e| ApiError::Unavailable {
            kind: e.kind(),
            message: e.to_string(),
            export_path: None,
        })?;
    Ok(Json(BatchesResponse { batches }))
}

/// MIME type guessed from a file name's extension.
pub fn content_type_for(title: &str) -> &'static str {
    let ext = title
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
