//! Route handlers.

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
    },
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use {
    zapflow_broadcast::BroadcastError,
    zapflow_common::MediaRef,
    zapflow_rules::LogicConfig,
    zapflow_store::StoreError,
};

use crate::AppState;

fn broadcast_error(e: BroadcastError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        BroadcastError::NotFound(_) | BroadcastError::Store(StoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        },
        BroadcastError::NotStartable { .. } | BroadcastError::Store(StoreError::Rejected(_)) => {
            StatusCode::CONFLICT
        },
        BroadcastError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn store_error(e: StoreError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Rejected(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

// ---- sessions ----

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "sessions": state.sessions.list() }))
}

pub async fn create_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    info!(account_id, "session create requested");
    state.sessions.create(&account_id).await;
    Json(json!({ "created": account_id }))
}

pub async fn destroy_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    info!(account_id, "session destroy requested");
    state.sessions.destroy(&account_id).await;
    Json(json!({ "destroyed": account_id }))
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.status(&account_id) {
        Some(status) => Json(json!({
            "account_id": account_id,
            "status": status,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no session for '{account_id}'") })),
        )
            .into_response(),
    }
}

pub async fn session_challenge(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.challenge(&account_id) {
        Some(challenge) => Json(json!({
            "account_id": account_id,
            "challenge": challenge,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no pairing challenge available" })),
        )
            .into_response(),
    }
}

// ---- broadcasts ----

#[derive(Debug, Deserialize)]
pub struct CreateBroadcast {
    pub account_id: String,
    pub message: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    pub contacts: Vec<String>,
}

pub async fn create_broadcast(
    State(state): State<AppState>,
    Json(req): Json<CreateBroadcast>,
) -> impl IntoResponse {
    match state
        .store
        .create_broadcast_job(&req.account_id, &req.message, req.media.as_ref(), &req.contacts)
        .await
    {
        Ok(job) => Json(json!({ "job": job })).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

pub async fn broadcast_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_broadcast_job(&job_id).await {
        Ok(Some(job)) => Json(json!({
            "job": job,
            "dispatching": state.dispatcher.is_active(&job_id),
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("job '{job_id}' not found") })),
        )
            .into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

pub async fn start_broadcast(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.start(&job_id).await {
        Ok(()) => Json(json!({ "started": job_id })).into_response(),
        Err(e) => broadcast_error(e).into_response(),
    }
}

pub async fn pause_broadcast(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.pause(&job_id).await {
        Ok(()) => Json(json!({ "paused": job_id })).into_response(),
        Err(e) => broadcast_error(e).into_response(),
    }
}

pub async fn delete_broadcast(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.delete(&job_id).await {
        Ok(()) => Json(json!({ "deleted": job_id })).into_response(),
        Err(e) => broadcast_error(e).into_response(),
    }
}

// ---- logic configs ----

pub async fn get_logic(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_logic_config(&account_id).await {
        Ok(Some(config)) => Json(json!({ "config": config })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no logic config for '{account_id}'") })),
        )
            .into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

pub async fn put_logic(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(config): Json<LogicConfig>,
) -> impl IntoResponse {
    match state.store.put_logic_config(&account_id, &config).await {
        Ok(()) => Json(json!({ "updated": account_id })).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    use {
        zapflow_broadcast::{BroadcastDispatcher, DispatcherConfig},
        zapflow_sessions::{SessionManager, SessionManagerConfig},
        zapflow_store::{Store, memory::MemoryStore},
        zapflow_transport::{Transport, fake::FakeTransport},
    };

    fn state() -> AppState {
        let (transport, _events) = FakeTransport::new();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(
            transport,
            Arc::clone(&store) as Arc<dyn Store>,
            SessionManagerConfig::default(),
        ));
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&sessions),
            DispatcherConfig {
                tick_interval: Duration::from_millis(10),
                ..DispatcherConfig::default()
            },
        ));
        AppState {
            sessions,
            dispatcher,
            store,
        }
    }

    #[tokio::test]
    async fn unknown_session_status_is_404() {
        let resp = session_status(State(state()), Path("ghost".into()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_status_round_trip() {
        let st = state();
        create_session(State(st.clone()), Path("acc".into())).await;
        let resp = session_status(State(st), Path("acc".into()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_unknown_broadcast_is_404() {
        let resp = start_broadcast(State(state()), Path("nope".into()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
