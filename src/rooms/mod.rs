mod list;
mod new;

use axum::{routing::get, Router};

use crate::AppState;

pub const MAX_ROOM_NAME_CHARS: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list::list_rooms).post(new::new_room))
}
