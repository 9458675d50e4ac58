//! Per-account session lifecycle and inbound dispatch.
//!
//! [`SessionManager`] owns one automated session per account and runs the
//! inbound pipeline: anti-loop screening ([`router`]), per-contact pause
//! gating ([`pause`]), rule evaluation, optional AI fallback, and the reply
//! send.

pub mod manager;
pub mod pause;
pub mod router;
pub mod state;

pub use {
    manager::{SendError, SessionManager, SessionManagerConfig},
    pause::{PauseRegistry, UNPAUSE_WORDS},
    router::DropReason,
    state::{ReadyIdentity, Session, SessionState},
};
