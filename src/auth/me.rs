use axum::{debug_handler, extract::State, Json};
use tower_sessions::Session;

use crate::{
    error::{AppResult, SyncError},
    protocol::UserBody,
    session::current_user,
    store::{MessageStore, SqliteStore},
    AppState,
};

#[debug_handler(state = AppState)]
pub(crate) async fn me(State(store): State<SqliteStore>, session: Session) -> AppResult<Json<UserBody>> {
    let user_id = current_user(&session).await?;
    // the account may have been removed since the session was issued
    let user = store.user(&user_id).await?.ok_or(SyncError::Unauthenticated)?;
    Ok(Json(UserBody { user }))
}
