//! Per-account session records.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde::Serialize;

/// Lifecycle of one automated session.
///
/// `Destroying` is terminal: a session in that state is removed and a fresh
/// record is created on the next `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    QrPending,
    Ready,
    Disconnected,
    Destroying,
}

/// One managed account's session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub account_id: String,
    pub state: SessionState,
    /// Pairing challenge payload, present only while `QrPending`.
    pub challenge: Option<String>,
    /// The account's own platform address, learned on ready.
    pub self_address: Option<String>,
    /// Unix seconds of the last transition to `Ready`.
    pub connected_at: Option<i64>,
}

impl Session {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            state: SessionState::Initializing,
            challenge: None,
            self_address: None,
            connected_at: None,
        }
    }
}

/// Shared session map, keyed by account id.
pub type SessionMap = Arc<RwLock<HashMap<String, Session>>>;

/// Identity of a managed account currently in `Ready`, used by the
/// anti-loop router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyIdentity {
    pub account_id: String,
    pub address: String,
}
