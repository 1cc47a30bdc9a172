mod history;
mod send;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send::send_message))
        .route("/messages/{room_id}", get(history::room_history))
}
