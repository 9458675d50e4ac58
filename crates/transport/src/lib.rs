//! Transport collaborator for the messaging platform.
//!
//! The runtime never speaks the platform protocol itself. It drives an
//! abstract [`Transport`] that can start and tear down one automated session
//! per account and send text/media messages, and it consumes the
//! [`TransportEvent`] stream the transport produces. The production
//! implementation is [`sidecar::SidecarTransport`], a WebSocket bridge to a
//! browser-automation sidecar process; [`fake::FakeTransport`] scripts the
//! same surface for tests.

pub mod fake;
pub mod sidecar;
pub mod types;

use async_trait::async_trait;

use zapflow_common::{InboundMessage, ReplyPayload};

/// Error from the transport layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("send timed out")]
    Timeout,
    #[error("session init failed: {0}")]
    Init(String),
}

/// Events emitted by a transport, consumed by the session dispatch loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Pairing challenge (QR payload) to show the operator.
    Challenge { account_id: String, payload: String },
    /// Credentials accepted; connection not yet usable.
    Authenticated { account_id: String },
    /// Session is fully connected. `self_address` is the account's own
    /// identity on the platform, used for anti-loop filtering.
    Ready {
        account_id: String,
        self_address: Option<String>,
    },
    /// Connection dropped.
    Disconnected { account_id: String, reason: String },
    /// Inbound message.
    Message(InboundMessage),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the automated session for an account. Resolution means the
    /// session is initializing, not that it is connected; progress arrives
    /// as events.
    async fn init_session(&self, account_id: &str) -> Result<(), TransportError>;

    /// Tear the automated session down and release its resources.
    async fn destroy_session(&self, account_id: &str) -> Result<(), TransportError>;

    /// Send a text (and optional media) message.
    async fn send(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> Result<(), TransportError>;
}
