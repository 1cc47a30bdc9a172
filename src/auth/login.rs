use axum::{debug_handler, extract::State, Json};
use tower_sessions::Session;
use tracing::info;

use crate::{
    error::{AppResult, SyncError},
    protocol::{LoginRequest, LoginResponse},
    session::USER_ID,
    store::SqliteStore,
    AppState,
};

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(store): State<SqliteStore>,
    session: Session,
    Json(LoginRequest { username, password }): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let Some(user) = store.verify_credentials(username.trim(), &password).await? else {
        return Err(SyncError::Unauthenticated.into());
    };

    session.insert(USER_ID, &user.user_id).await?;
    info!(user = %user.user_id, "welcome @{}", user.username);

    Ok(Json(LoginResponse { success: true, user }))
}
