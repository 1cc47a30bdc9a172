use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use thiserror::Error;

use crate::protocol::ErrorBody;

/// Failure taxonomy of the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Empty body, unknown room or user. Never retried automatically.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The store is unreachable or rejected the write. Nothing was broadcast.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("not authenticated")]
    Unauthenticated,
}

impl SyncError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SyncError::InvalidRequest(msg.into())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::PersistenceFailure(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<SyncError>() {
            Some(SyncError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Some(SyncError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            Some(SyncError::PersistenceFailure(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(SyncError::TransportFailure(_)) => StatusCode::BAD_GATEWAY,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{:?}\n{}", self.0, self.0.backtrace());
        } else {
            tracing::debug!(%status, "rejected: {}", self.0);
        }

        (
            status,
            Json(ErrorBody { error: self.0.to_string() }),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
