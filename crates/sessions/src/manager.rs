//! Account session lifecycle and inbound dispatch.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    zapflow_ai::CompletionProvider,
    zapflow_common::{InboundMessage, ReplyPayload, text::normalize},
    zapflow_store::{Direction, Store},
    zapflow_transport::{Transport, TransportError, TransportEvent},
};

use crate::{
    pause::PauseRegistry,
    router,
    state::{ReadyIdentity, Session, SessionMap, SessionState},
};

/// System instruction for AI-augmented fallback replies when the logic
/// config does not carry its own.
const DEFAULT_AI_INSTRUCTION: &str =
    "Voce e um atendente virtual. Responda em uma frase curta e educada.";

/// Error returned by [`SessionManager::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("session for '{0}' is not ready")]
    NotReady(String),
    #[error("send timed out")]
    Timeout,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Tuning for the session manager.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Fixed backoff before an automatic reconnect attempt.
    pub reconnect_backoff: Duration,
    /// Upper bound on one transport send.
    pub send_timeout: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(15),
            send_timeout: Duration::from_secs(45),
        }
    }
}

/// Owns one automated session per account and mediates all inbound and
/// outbound traffic for them.
pub struct SessionManager {
    sessions: SessionMap,
    pause: PauseRegistry,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    ai: Option<Arc<dyn CompletionProvider>>,
    config: SessionManagerConfig,
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            pause: PauseRegistry::new(),
            transport,
            store,
            ai: None,
            config,
        }
    }

    pub fn with_ai(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.ai = Some(provider);
        self
    }

    /// The pause registry, exposed for the gateway's manual pause/resume.
    pub fn pause_registry(&self) -> &PauseRegistry {
        &self.pause
    }

    /// Start (or restart) the session for an account.
    ///
    /// No-op when a session already exists outside `Disconnected` and
    /// `Destroying`; otherwise any stale session is torn down first. The
    /// check and the insert of the fresh record happen under one write
    /// lock, so concurrent creates for the same account claim the slot
    /// exactly once.
    pub async fn create(self: &Arc<Self>, account_id: &str) {
        let stale = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            match sessions.get(account_id).map(|s| s.state) {
                Some(state)
                    if !matches!(
                        state,
                        SessionState::Disconnected | SessionState::Destroying
                    ) =>
                {
                    debug!(account_id, ?state, "session already active, ignoring create");
                    return;
                },
                existing => {
                    sessions.insert(account_id.to_string(), Session::new(account_id));
                    existing.is_some()
                },
            }
        };

        if stale {
            if let Err(e) = self.transport.destroy_session(account_id).await {
                warn!(account_id, error = %e, "stale session teardown failed");
            }
            self.pause.remove_account(account_id);
        }
        info!(account_id, "starting session");

        if let Err(e) = self.transport.init_session(account_id).await {
            warn!(account_id, error = %e, "session init failed, scheduling retry");
            self.set_state(account_id, SessionState::Disconnected);
            self.schedule_reconnect(account_id);
        }
    }

    /// Tear the session down and forget its pause state.
    pub async fn destroy(&self, account_id: &str) {
        // Mark before the async teardown so anti-loop checks and sends see
        // the session as gone immediately.
        let existed = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            match sessions.get_mut(account_id) {
                Some(session) => {
                    session.state = SessionState::Destroying;
                    session.challenge = None;
                    true
                },
                None => false,
            }
        };
        if !existed {
            debug!(account_id, "destroy for unknown session");
            return;
        }

        if let Err(e) = self.transport.destroy_session(account_id).await {
            warn!(account_id, error = %e, "transport teardown failed");
        }

        {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            sessions.remove(account_id);
        }
        self.pause.remove_account(account_id);
        info!(account_id, "session destroyed");
    }

    /// Send a message on an account's session.
    ///
    /// Fails with [`SendError::NotReady`] unless the session is `Ready`.
    /// The transport call is bounded by the configured send timeout so a
    /// hung send cannot stall callers forever.
    pub async fn send(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> Result<(), SendError> {
        if self.status(account_id) != Some(SessionState::Ready) {
            return Err(SendError::NotReady(account_id.to_string()));
        }
        match tokio::time::timeout(
            self.config.send_timeout,
            self.transport.send(account_id, to, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SendError::Timeout),
        }
    }

    pub fn status(&self, account_id: &str) -> Option<SessionState> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(account_id).map(|s| s.state)
    }

    /// Pairing challenge payload, present only while the session waits for
    /// the operator to scan it.
    pub fn challenge(&self, account_id: &str) -> Option<String> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(account_id).and_then(|s| s.challenge.clone())
    }

    /// Snapshot of every managed session (dashboard polling).
    pub fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.values().cloned().collect()
    }

    fn ready_identities(&self) -> Vec<ReadyIdentity> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .values()
            .filter(|s| s.state == SessionState::Ready)
            .filter_map(|s| {
                s.self_address.as_ref().map(|addr| ReadyIdentity {
                    account_id: s.account_id.clone(),
                    address: addr.clone(),
                })
            })
            .collect()
    }

    fn set_state(&self, account_id: &str, state: SessionState) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(account_id) {
            session.state = state;
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, account_id: &str) {
        let mgr = Arc::clone(self);
        let account = account_id.to_string();
        let backoff = self.config.reconnect_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            // A destroy may have raced in during the backoff.
            if mgr.status(&account) == Some(SessionState::Disconnected) {
                info!(account_id = %account, "reconnecting session");
                mgr.create(&account).await;
            }
        });
    }

    /// Consume transport events until the stream closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("transport event stream closed");
    }

    /// Apply one transport event to the state machine.
    pub async fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Challenge {
                account_id,
                payload,
            } => {
                debug!(account_id, "pairing challenge received");
                let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
                if let Some(session) = sessions.get_mut(&account_id)
                    && session.state != SessionState::Destroying
                {
                    session.state = SessionState::QrPending;
                    session.challenge = Some(payload);
                }
            },
            TransportEvent::Authenticated { account_id } => {
                debug!(account_id, "authenticated");
            },
            TransportEvent::Ready {
                account_id,
                self_address,
            } => {
                info!(account_id, "session ready");
                let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
                if let Some(session) = sessions.get_mut(&account_id)
                    && session.state != SessionState::Destroying
                {
                    session.state = SessionState::Ready;
                    session.challenge = None;
                    session.self_address = self_address;
                    session.connected_at = Some(unix_now());
                }
            },
            TransportEvent::Disconnected { account_id, reason } => {
                let destroying = self.status(&account_id) == Some(SessionState::Destroying);
                if destroying {
                    debug!(account_id, reason, "disconnect during teardown");
                    return;
                }
                warn!(account_id, reason, "session disconnected");
                {
                    let mut sessions =
                        self.sessions.write().unwrap_or_else(|e| e.into_inner());
                    if let Some(session) = sessions.get_mut(&account_id) {
                        session.state = SessionState::Disconnected;
                        session.challenge = None;
                        session.self_address = None;
                        session.connected_at = None;
                    }
                }
                self.schedule_reconnect(&account_id);
            },
            TransportEvent::Message(msg) => self.handle_inbound(msg).await,
        }
    }

    async fn handle_inbound(&self, msg: InboundMessage) {
        let account_id = msg.account_id.clone();

        if let Some(reason) = router::screen(&msg, &self.ready_identities()) {
            debug!(account_id, sender = %msg.sender, %reason, "inbound dropped");
            return;
        }

        let normalized = normalize(&msg.body);
        if self.pause.is_paused(&account_id, &msg.sender)
            && !self.pause.try_unpause(&account_id, &msg.sender, &normalized)
        {
            debug!(account_id, sender = %msg.sender, "contact paused, inbound dropped");
            return;
        }

        let config = match self.store.get_logic_config(&account_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(account_id, "no logic config, inbound ignored");
                return;
            },
            Err(e) => {
                warn!(account_id, error = %e, "failed to load logic config");
                return;
            },
        };

        let outcome = zapflow_rules::evaluate(&msg.body, &config);

        let mut reply_text = outcome.reply.clone();
        if !outcome.matched
            && config.ai_fallback
            && let Some(ai) = &self.ai
        {
            let instruction = config
                .ai_instruction
                .as_deref()
                .unwrap_or(DEFAULT_AI_INSTRUCTION);
            match ai.complete(instruction, &msg.body).await {
                Ok(text) => reply_text = text,
                Err(e) => {
                    warn!(account_id, error = %e, "ai fallback failed, using default reply");
                },
            }
        }

        let payload = ReplyPayload {
            text: reply_text,
            media: outcome.media.clone(),
        };

        let sent = match self.send(&account_id, &msg.chat, &payload).await {
            Ok(()) => true,
            Err(e) => {
                // Nothing to surface to the contact; the reply is dropped.
                warn!(account_id, to = %msg.chat, error = %e, "reply send failed");
                false
            },
        };

        if sent && outcome.pause_after_reply {
            self.pause.pause(&account_id, &msg.sender);
            debug!(account_id, sender = %msg.sender, "contact paused after reply");
        }

        self.log_conversation(&account_id, &msg, sent.then_some(payload.text.as_str()))
            .await;
    }

    /// Record the exchange. Persistence problems are logged, never allowed
    /// to take the conversational path down.
    async fn log_conversation(&self, account_id: &str, msg: &InboundMessage, reply: Option<&str>) {
        let conversation = match self
            .store
            .get_or_create_conversation(account_id, &msg.sender)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(account_id, error = %e, "conversation lookup failed");
                return;
            },
        };
        if let Err(e) = self
            .store
            .append_message(&conversation, Direction::Inbound, &msg.body, false)
            .await
        {
            warn!(account_id, error = %e, "failed to log inbound message");
        }
        if let Some(reply) = reply
            && let Err(e) = self
                .store
                .append_message(&conversation, Direction::Outbound, reply, true)
                .await
        {
            warn!(account_id, error = %e, "failed to log reply");
        }
    }
}
