//! Barfly HTTP server library.
//!
//! Exposes the router and shared state so the binary and the integration
//! tests build the same application.

pub mod api;
pub mod api_rooms;
pub mod api_sessions;
pub mod api_sse;
pub mod config;
pub mod expiry;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, patch, post},
    Extension, Router,
};
use barfly_live::LiveSyncEngine;
use barfly_store::SqliteStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Record store; handlers write through it directly.
    pub store: SqliteStore,
    /// Live view engine reading from the same store.
    pub engine: Arc<LiveSyncEngine>,
}

impl AppState {
    /// Builds the state and starts the engine's feed readers. Must be called
    /// inside a Tokio runtime.
    pub fn new(store: SqliteStore, live: barfly_live::LiveConfig) -> Self {
        let engine = LiveSyncEngine::new(Arc::new(store.clone()), live);
        Self {
            store,
            engine: Arc::new(engine),
        }
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health))
        .route("/api/sessions", post(api_sessions::create_session_handler))
        .route("/api/sessions/nearby", get(api_sessions::nearby_handler))
        .route(
            "/api/sessions/{id}",
            get(api_sessions::get_session_handler)
                .patch(api_sessions::update_session_handler)
                .delete(api_sessions::delete_session_handler),
        )
        .route(
            "/api/sessions/{id}/location",
            patch(api_sessions::move_session_handler),
        )
        .route(
            "/api/rooms/{room_id}/messages",
            post(api_rooms::post_message_handler).get(api_rooms::list_messages_handler),
        )
        .route("/events/nearby", get(api_sse::nearby_stream_handler))
        .route("/events/rooms/{room_id}", get(api_sse::room_stream_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
