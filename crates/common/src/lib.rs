//! Shared types for the zapflow runtime.
//!
//! Message and address shapes used across the session, rules, broadcast and
//! transport crates live here so the leaf crates stay dependency-free of
//! each other.

pub mod text;
pub mod types;

pub use types::{InboundMessage, MediaRef, ReplyPayload};
