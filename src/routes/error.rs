use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::db::store::StoreError;
use crate::pipeline::PipelineError;
use crate::services::submission::SubmitError;

/// Error returned by the post routes, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unprocessable(String),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Invalid(msg) => Self::Unprocessable(msg),
            SubmitError::Store(e) => e.into(),
            SubmitError::Queue(e) => Self::Unavailable(format!("Job could not be queued: {e}")),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::JobNotFound(id) => Self::NotFound(id),
            PipelineError::NotReady(_) => Self::Conflict(e.to_string()),
            PipelineError::Store(e) => e.into(),
            PipelineError::Ai(_)
            | PipelineError::Storage(_)
            | PipelineError::Timeout { .. }
            | PipelineError::Image(_)
            | PipelineError::Generation(_) => Self::Unavailable(e.to_string()),
            PipelineError::Cancelled => Self::Conflict("Job was cancelled".to_string()),
        }
    }
}
