pub mod auth;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod index;
pub mod messages;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod store;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::FromRef,
    http::{HeaderValue, Method, header},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

use crate::{
    config::Config,
    coordinator::SyncCoordinator,
    registry::RoomRegistry,
    store::{MessageStore, SqliteStore},
};

pub use error::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: SqliteStore,
    pub coordinator: SyncCoordinator,
}

impl AppState {
    pub fn new(store: SqliteStore, store_timeout: Duration) -> Self {
        let messages: Arc<dyn MessageStore> = Arc::new(store.clone());
        Self::with_message_store(store, messages, store_timeout)
    }

    /// Serves accounts and rooms from `store` but routes messages through
    /// `messages`.
    pub fn with_message_store(store: SqliteStore, messages: Arc<dyn MessageStore>, store_timeout: Duration) -> Self {
        let coordinator = SyncCoordinator::with_timeout(messages, RoomRegistry::new(), store_timeout);
        Self { store, coordinator }
    }
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = if config.allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).with_context(|| format!("invalid allowed origin {origin}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]))
}

pub fn router(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_minutes)));

    Ok(Router::new()
        .route("/", get(index::index))
        .route("/ws", get(ws::realtime))
        .nest("/auth", auth::router())
        .merge(rooms::router())
        .merge(messages::router())
        .with_state(state)
        .layer(session_layer)
        .layer(cors_layer(config)?)
        .layer(TraceLayer::new_for_http()))
}
