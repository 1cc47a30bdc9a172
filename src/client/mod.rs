//! Chat client: HTTP calls, the real-time channel and the local room view.

mod connection;
mod reconciler;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{
    cookie::{CookieStore, Jar},
    Response, Url,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    model::{Message, Room, User},
    protocol::{
        ClientEvent, ErrorBody, LoginRequest, LoginResponse, MessageBody, MessagesBody, NewRoomRequest,
        RoomBody, RoomsBody, ServerEvent, SubmitRequest,
    },
};

pub use connection::Connection;
pub use reconciler::{ClientReconciler, Merge, RetryDraft};

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("server rejected request ({status}): {error}")]
    Rejected { status: u16, error: String },

    #[error("submission timed out")]
    Timeout,

    #[error("real-time channel is not connected")]
    NotConnected,

    #[error("real-time channel closed")]
    Disconnected,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("no room is open")]
    NoRoom,

    #[error("message body is empty")]
    EmptyBody,

    #[error("no failed entry with local id {0}")]
    UnknownEntry(String),
}

impl ClientError {
    /// True for errors of the real-time transport, recovered by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::WebSocket(_) | ClientError::Disconnected | ClientError::NotConnected)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let error = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_owned(),
    };
    Err(ClientError::Rejected {
        status: status.as_u16(),
        error,
    })
}

/// One user's session against a server, with at most one open room view.
pub struct ChatClient {
    http: reqwest::Client,
    cookies: Arc<Jar>,
    base_url: Url,
    connection: Connection,
    submit_timeout: Duration,
    user: Option<User>,
    view: Option<ClientReconciler>,
}

impl ChatClient {
    pub fn new(base_url: &str, connection: Connection) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|err| ClientError::InvalidUrl(err.to_string()))?;
        let cookies = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .build()?;

        Ok(Self {
            http,
            cookies,
            base_url,
            connection,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            user: None,
            view: None,
        })
    }

    pub fn with_submit_timeout(mut self, submit_timeout: Duration) -> Self {
        self.submit_timeout = submit_timeout;
        self
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn view(&self) -> Option<&ClientReconciler> {
        self.view.as_ref()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|err| ClientError::InvalidUrl(err.to_string()))
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<User, ClientError> {
        let response = self
            .http
            .post(self.url("/auth/login")?)
            .json(&LoginRequest {
                username: username.to_owned(),
                password: password.to_owned(),
            })
            .send()
            .await?;
        let LoginResponse { user, .. } = read_json(response).await?;
        info!(user = %user.user_id, "logged in as {}", user.username);
        self.user = Some(user.clone());
        Ok(user)
    }

    pub async fn logout(&mut self) -> Result<(), ClientError> {
        self.close_room().await;
        self.http.post(self.url("/auth/logout")?).send().await?;
        self.user = None;
        Ok(())
    }

    pub async fn rooms(&self) -> Result<Vec<Room>, ClientError> {
        let response = self.http.get(self.url("/rooms")?).send().await?;
        Ok(read_json::<RoomsBody>(response).await?.rooms)
    }

    pub async fn create_room(&self, name: &str) -> Result<Room, ClientError> {
        let response = self
            .http
            .post(self.url("/rooms")?)
            .json(&NewRoomRequest { name: name.to_owned() })
            .send()
            .await?;
        Ok(read_json::<RoomBody>(response).await?.room)
    }

    pub async fn history(&self, room_id: &str) -> Result<Vec<Message>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/messages/{room_id}"))?)
            .send()
            .await?;
        Ok(read_json::<MessagesBody>(response).await?.messages)
    }

    /// Makes `room_id` the active view: connects the channel, joins the room
    /// and loads its history.
    pub async fn open_room(&mut self, room_id: &str) -> Result<(), ClientError> {
        self.close_room().await;
        self.view = Some(ClientReconciler::new(room_id));
        self.rejoin().await
    }

    /// Leaves the active room and closes the channel.
    pub async fn close_room(&mut self) {
        let Some(view) = self.view.take() else {
            return;
        };
        if let Some(user) = &self.user {
            let leave = ClientEvent::LeaveRoom {
                room_id: view.room_id().to_owned(),
                user_id: user.user_id.clone(),
            };
            if let Err(err) = self.connection.send(&leave).await {
                debug!("leave not sent: {err}");
            }
        }
        self.connection.disconnect().await;
    }

    /// Re-establishes the channel for the active room after a transport
    /// failure. Messages broadcast while disconnected come back through the
    /// history refetch.
    pub async fn rejoin(&mut self) -> Result<(), ClientError> {
        let user_id = self.user.as_ref().ok_or(ClientError::NotLoggedIn)?.user_id.clone();
        let room_id = self.view.as_ref().ok_or(ClientError::NoRoom)?.room_id().to_owned();

        self.connection.connect(self.cookies.cookies(&self.base_url)).await?;
        self.connection
            .send(&ClientEvent::JoinRoom {
                room_id: room_id.clone(),
                user_id,
            })
            .await?;

        // joined before fetching, so nothing falls between history and live events
        let history = self.history(&room_id).await?;
        if let Some(view) = self.view.as_mut() {
            view.load_history(history);
        }
        Ok(())
    }

    /// Shows `body` immediately and submits it. On failure or timeout the
    /// entry stays in the view as `failed`.
    pub async fn send(&mut self, body: &str, replied_to_id: Option<String>) -> Result<Message, ClientError> {
        let user = self.user.clone().ok_or(ClientError::NotLoggedIn)?;
        let view = self.view.as_mut().ok_or(ClientError::NoRoom)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ClientError::EmptyBody);
        }

        let local_id = Uuid::now_v7().to_string();
        let optimistic = Message::optimistic(&local_id, view.room_id(), &user, body, replied_to_id.clone());
        view.push_optimistic(optimistic);

        self.submit(&local_id, body.to_owned(), replied_to_id).await
    }

    /// Resubmits a failed entry under its original local id.
    pub async fn retry(&mut self, local_id: &str) -> Result<Message, ClientError> {
        let view = self.view.as_mut().ok_or(ClientError::NoRoom)?;
        let draft = view
            .retry(local_id)
            .ok_or_else(|| ClientError::UnknownEntry(local_id.to_owned()))?;
        self.submit(&draft.local_id, draft.body, draft.replied_to_id).await
    }

    /// Drops a failed entry from the view.
    pub fn discard(&mut self, local_id: &str) -> bool {
        self.view.as_mut().is_some_and(|view| view.discard(local_id))
    }

    async fn submit(
        &mut self,
        local_id: &str,
        body: String,
        replied_to_id: Option<String>,
    ) -> Result<Message, ClientError> {
        let user_id = self.user.as_ref().ok_or(ClientError::NotLoggedIn)?.user_id.clone();
        let room_id = self.view.as_ref().ok_or(ClientError::NoRoom)?.room_id().to_owned();
        let request = SubmitRequest {
            room_id,
            sender_id: user_id,
            body,
            replied_to_id,
            local_id: Some(local_id.to_owned()),
        };

        let outcome = match tokio::time::timeout(self.submit_timeout, self.post_message(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };

        let Some(view) = self.view.as_mut() else {
            return outcome;
        };
        match outcome {
            Ok(message) => {
                view.confirm(local_id, message.clone());
                if self.connection.is_connected() {
                    let trigger = ClientEvent::SendMessage { message: message.clone() };
                    if let Err(err) = self.connection.send(&trigger).await {
                        debug!("echo trigger not sent: {err}");
                    }
                }
                Ok(message)
            }
            Err(err) => {
                warn!(local_id, "submission failed: {err}");
                view.mark_failed(local_id);
                Err(err)
            }
        }
    }

    async fn post_message(&self, request: &SubmitRequest) -> Result<Message, ClientError> {
        let response = self.http.post(self.url("/messages")?).json(request).send().await?;
        Ok(read_json::<MessageBody>(response).await?.message)
    }

    /// Reports every unseen peer message in the view as seen, in one batch.
    pub async fn mark_seen(&mut self) -> Result<Vec<String>, ClientError> {
        let user_id = self.user.as_ref().ok_or(ClientError::NotLoggedIn)?.user_id.clone();
        let view = self.view.as_ref().ok_or(ClientError::NoRoom)?;
        let canonical_ids = view.unseen_from_peers(&user_id);
        if canonical_ids.is_empty() {
            return Ok(canonical_ids);
        }

        let event = ClientEvent::MarkSeen {
            canonical_ids: canonical_ids.clone(),
            room_id: view.room_id().to_owned(),
            user_id,
        };
        self.connection.send(&event).await?;
        Ok(canonical_ids)
    }

    /// Waits for the next server event and applies it to the view. Peer
    /// messages are acknowledged as delivered. A dropped channel is
    /// reconnected once before the error is surfaced.
    pub async fn next_event(&mut self) -> Result<ServerEvent, ClientError> {
        let event = match self.connection.recv().await {
            Ok(event) => event,
            Err(err) if err.is_transport() => {
                warn!("real-time channel lost: {err}; reconnecting");
                self.rejoin().await?;
                self.connection.recv().await?
            }
            Err(err) => return Err(err),
        };

        self.apply(&event).await;
        Ok(event)
    }

    async fn apply(&mut self, event: &ServerEvent) {
        let (Some(user), Some(view)) = (&self.user, self.view.as_mut()) else {
            return;
        };

        match event {
            ServerEvent::ReceiveMessage { message } => {
                if view.apply_incoming(message.clone()) == Merge::Ignored {
                    return;
                }
                if message.sender_id == user.user_id {
                    return;
                }
                let Some(canonical_id) = message.canonical_id.clone() else {
                    return;
                };
                let ack = ClientEvent::MarkDelivered {
                    canonical_id,
                    room_id: message.room_id.clone(),
                    user_id: user.user_id.clone(),
                };
                if let Err(err) = self.connection.send(&ack).await {
                    debug!("delivery ack not sent: {err}");
                }
            }
            ServerEvent::StatusUpdate(update) => {
                view.apply_status(update);
            }
            ServerEvent::Error { message } => {
                warn!("server reported: {message}");
            }
        }
    }
}
