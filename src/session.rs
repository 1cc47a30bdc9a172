use tower_sessions::Session;

use crate::error::{AppError, AppResult, SyncError};

pub const USER_ID: &str = "user_id";

/// The user id the session was authenticated as, or `401`.
pub async fn current_user(session: &Session) -> AppResult<String> {
    session
        .get::<String>(USER_ID)
        .await?
        .ok_or_else(|| AppError::from(SyncError::Unauthenticated))
}
