use axum::{debug_handler, extract::State, http::StatusCode, Json};
use tower_sessions::Session;

use crate::{
    coordinator::SyncCoordinator,
    error::AppResult,
    protocol::{MessageBody, SubmitRequest},
    session::current_user,
    AppState,
};

#[debug_handler(state = AppState)]
pub(crate) async fn send_message(
    State(coordinator): State<SyncCoordinator>,
    session: Session,
    Json(request): Json<SubmitRequest>,
) -> AppResult<(StatusCode, Json<MessageBody>)> {
    let user_id = current_user(&session).await?;
    let message = coordinator.submit(request, &user_id).await?;
    Ok((StatusCode::CREATED, Json(MessageBody { message })))
}
