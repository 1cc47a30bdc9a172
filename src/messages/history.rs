use axum::{debug_handler, extract::{Path, State}, Json};
use tower_sessions::Session;

use crate::{
    coordinator::SyncCoordinator,
    error::AppResult,
    protocol::MessagesBody,
    session::current_user,
    AppState,
};

#[debug_handler(state = AppState)]
pub(crate) async fn room_history(
    State(coordinator): State<SyncCoordinator>,
    session: Session,
    Path(room_id): Path<String>,
) -> AppResult<Json<MessagesBody>> {
    current_user(&session).await?;
    let messages = coordinator.history(&room_id).await?;
    Ok(Json(MessagesBody { messages }))
}
