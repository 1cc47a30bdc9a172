use axum::{debug_handler, extract::State, Json};
use tower_sessions::Session;

use crate::{
    error::AppResult,
    protocol::RoomsBody,
    session::current_user,
    store::SqliteStore,
    AppState,
};

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(store): State<SqliteStore>,
    session: Session,
) -> AppResult<Json<RoomsBody>> {
    current_user(&session).await?;
    let rooms = store.list_rooms().await?;
    Ok(Json(RoomsBody { rooms }))
}
