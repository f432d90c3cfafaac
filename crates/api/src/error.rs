//! HTTP mapping of service errors.
//!
//! Every handler returns [`AppResult`]. Domain and storage failures arrive
//! as [`ActivityError`]; request-shape problems detected in the API layer
//! are [`AppError::BadRequest`]. Responses carry `{ "error", "code" }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tidings_core::error::CoreError;
use tidings_events::ActivityError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Activity(ActivityError::Core(err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Activity(ActivityError::Core(core)) => match core {
                CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                CoreError::Conflict(_) => StatusCode::CONFLICT,
                CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Activity(ActivityError::Database(err)) if storage_unavailable(err) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Activity(ActivityError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (code, error) = match self {
            AppError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),
            AppError::Activity(ActivityError::Core(core)) => match core {
                CoreError::NotFound { entity, id } => {
                    ("NOT_FOUND", format!("{entity} with id {id} not found"))
                }
                CoreError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
                CoreError::Conflict(msg) => ("CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => ("UNAUTHORIZED", msg.clone()),
                CoreError::Forbidden(msg) => ("FORBIDDEN", msg.clone()),
                CoreError::Internal(_) => ("INTERNAL_ERROR", "An internal error occurred".into()),
            },
            AppError::Activity(ActivityError::Database(err)) if storage_unavailable(err) => (
                "STORAGE_UNAVAILABLE",
                "Notification storage is unavailable".into(),
            ),
            AppError::Activity(ActivityError::Database(_)) => {
                ("INTERNAL_ERROR", "An internal error occurred".into())
            }
        };
        ErrorBody { error, code }
    }
}

/// Pool exhaustion and shutdown are transient; clients may retry.
fn storage_unavailable(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
