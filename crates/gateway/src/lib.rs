//! Dashboard-facing HTTP surface.
//!
//! Thin pass-throughs into the session manager, broadcast dispatcher and
//! store. No business logic lives here.

pub mod routes;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use {
    zapflow_broadcast::BroadcastDispatcher, zapflow_sessions::SessionManager,
    zapflow_store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub store: Arc<dyn Store>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(routes::list_sessions))
        .route("/api/sessions/{account_id}", post(routes::create_session))
        .route("/api/sessions/{account_id}", delete(routes::destroy_session))
        .route("/api/sessions/{account_id}/status", get(routes::session_status))
        .route(
            "/api/sessions/{account_id}/challenge",
            get(routes::session_challenge),
        )
        .route("/api/broadcasts", post(routes::create_broadcast))
        .route("/api/broadcasts/{job_id}", get(routes::broadcast_status))
        .route("/api/broadcasts/{job_id}", delete(routes::delete_broadcast))
        .route("/api/broadcasts/{job_id}/start", post(routes::start_broadcast))
        .route("/api/broadcasts/{job_id}/pause", post(routes::pause_broadcast))
        .route("/api/accounts/{account_id}/logic", get(routes::get_logic))
        .route("/api/accounts/{account_id}/logic", put(routes::put_logic))
        .with_state(state)
}
