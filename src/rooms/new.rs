use axum::{debug_handler, extract::State, http::StatusCode, Json};
use tower_sessions::Session;
use tracing::info;

use crate::{
    error::{AppResult, SyncError},
    protocol::{NewRoomRequest, RoomBody},
    session::current_user,
    store::SqliteStore,
    AppState,
};

use super::MAX_ROOM_NAME_CHARS;

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(store): State<SqliteStore>,
    session: Session,
    Json(NewRoomRequest { name }): Json<NewRoomRequest>,
) -> AppResult<(StatusCode, Json<RoomBody>)> {
    let user_id = current_user(&session).await?;

    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::invalid("room name is empty").into());
    }
    if name.chars().count() > MAX_ROOM_NAME_CHARS {
        return Err(SyncError::invalid(format!("room name exceeds {MAX_ROOM_NAME_CHARS} characters")).into());
    }

    let room = store.create_room(name).await?;
    info!(room = %room.room_id, user = %user_id, "created room {}", room.name);

    Ok((StatusCode::CREATED, Json(RoomBody { room })))
}
