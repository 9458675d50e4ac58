//! Inbound/outbound message shapes shared across crates.

use serde::{Deserialize, Serialize};

/// An inbound message event as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Account the event arrived on.
    pub account_id: String,
    /// Platform message id.
    pub message_id: String,
    /// Chat the message belongs to (equals `sender` for 1:1 chats).
    pub chat: String,
    /// Address of the author.
    pub sender: String,
    /// Display name of the author, when the platform provides one.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// True when the message was authored by the account itself (echo).
    #[serde(default)]
    pub from_me: bool,
    /// True for group chats.
    #[serde(default)]
    pub is_group: bool,
    /// True for status/story updates rather than direct messages.
    #[serde(default)]
    pub is_status: bool,
    /// Message text.
    pub body: String,
    /// Platform timestamp, seconds since epoch.
    #[serde(default)]
    pub timestamp: f64,
}

/// Reference to a media attachment resolvable by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
}

/// An outbound reply: text plus optional media attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }
}

/// Whether an address denotes a group chat (never a 1:1 contact).
pub fn is_group_address(address: &str) -> bool {
    address.ends_with("@g.us")
}

/// Whether an address denotes a broadcast list or status feed.
pub fn is_broadcast_address(address: &str) -> bool {
    address.ends_with("@broadcast")
}

/// Whether a chat address is the status/story feed.
pub fn is_status_address(address: &str) -> bool {
    address == "status@broadcast"
}
