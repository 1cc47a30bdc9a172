//! The real-time channel endpoint.

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tower_sessions::Session;
use tracing::{debug, info, warn};

use crate::{
    AppState,
    coordinator::SyncCoordinator,
    error::{AppResult, SyncError},
    protocol::{ClientEvent, ServerEvent},
    session::current_user,
};

#[debug_handler(state = AppState)]
pub async fn realtime(
    State(coordinator): State<SyncCoordinator>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = current_user(&session).await?;
    Ok(ws.on_upgrade(async move |socket| serve_connection(coordinator, user_id, socket).await))
}

async fn serve_connection(coordinator: SyncCoordinator, user_id: String, socket: WebSocket) {
    let registry = coordinator.registry().clone();
    let (connection, mut outbound) = registry.connect(&user_id).await;
    info!(%connection, user = %user_id, "real-time channel open");

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&*event) {
                Ok(json) => json,
                Err(err) => {
                    warn!("dropping unserializable event: {err}");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let reader = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let outcome = match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => coordinator.handle_event(connection, &user_id, event).await,
                Err(err) => {
                    debug!(%connection, "unparseable client event: {err}");
                    Err(SyncError::invalid(format!("malformed event: {err}")))
                }
            };

            if let Err(err) = outcome {
                warn!(%connection, user = %user_id, "event rejected: {err}");
                registry
                    .send_to(connection, ServerEvent::Error { message: err.to_string() })
                    .await;
            }
        }
    };

    tokio::select! {
        _ = reader => {},
        _ = &mut writer => {},
    }

    registry.disconnect(connection).await;
    writer.abort();
    info!(%connection, user = %user_id, "real-time channel closed");
}
