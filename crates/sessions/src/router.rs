//! Anti-loop inbound filter.
//!
//! Screens inbound events before any rule evaluation. The only state it
//! reads is a snapshot of the identities of other managed accounts that are
//! currently ready, which is what prevents two automated accounts from
//! replying to each other indefinitely.

use zapflow_common::{
    InboundMessage,
    types::{is_broadcast_address, is_group_address, is_status_address},
};

use crate::state::ReadyIdentity;

/// Why an inbound event was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    GroupAddress,
    BroadcastAddress,
    StatusUpdate,
    SelfEcho,
    /// The sender is another managed account's own identity.
    ManagedPeer { peer_account: String },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GroupAddress => write!(f, "group address"),
            Self::BroadcastAddress => write!(f, "broadcast-list address"),
            Self::StatusUpdate => write!(f, "status update"),
            Self::SelfEcho => write!(f, "echo of own send"),
            Self::ManagedPeer { peer_account } => {
                write!(f, "sender is managed account '{peer_account}'")
            },
        }
    }
}

/// Decide whether an inbound event may proceed to rule evaluation.
/// `None` means accepted.
pub fn screen(msg: &InboundMessage, ready: &[ReadyIdentity]) -> Option<DropReason> {
    if msg.is_group || is_group_address(&msg.chat) {
        return Some(DropReason::GroupAddress);
    }
    if msg.is_status || is_status_address(&msg.chat) {
        return Some(DropReason::StatusUpdate);
    }
    if is_broadcast_address(&msg.chat) {
        return Some(DropReason::BroadcastAddress);
    }
    if msg.from_me {
        return Some(DropReason::SelfEcho);
    }
    if let Some(peer) = ready
        .iter()
        .find(|id| id.account_id != msg.account_id && id.address == msg.sender)
    {
        return Some(DropReason::ManagedPeer {
            peer_account: peer.account_id.clone(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(account: &str, chat: &str, sender: &str) -> InboundMessage {
        InboundMessage {
            account_id: account.into(),
            message_id: "m1".into(),
            chat: chat.into(),
            sender: sender.into(),
            sender_name: None,
            from_me: false,
            is_group: false,
            is_status: false,
            body: "oi".into(),
            timestamp: 0.0,
        }
    }

    #[test]
    fn accepts_plain_direct_message() {
        assert_eq!(screen(&msg("a", "555@c.us", "555@c.us"), &[]), None);
    }

    #[test]
    fn drops_group_messages() {
        let mut m = msg("a", "123@g.us", "555@c.us");
        assert_eq!(screen(&m, &[]), Some(DropReason::GroupAddress));
        m = msg("a", "555@c.us", "555@c.us");
        m.is_group = true;
        assert_eq!(screen(&m, &[]), Some(DropReason::GroupAddress));
    }

    #[test]
    fn drops_status_and_broadcast() {
        assert_eq!(
            screen(&msg("a", "status@broadcast", "555@c.us"), &[]),
            Some(DropReason::StatusUpdate)
        );
        assert_eq!(
            screen(&msg("a", "99@broadcast", "555@c.us"), &[]),
            Some(DropReason::BroadcastAddress)
        );
    }

    #[test]
    fn drops_own_echo() {
        let mut m = msg("a", "555@c.us", "111@c.us");
        m.from_me = true;
        assert_eq!(screen(&m, &[]), Some(DropReason::SelfEcho));
    }

    #[test]
    fn drops_message_from_other_ready_managed_account() {
        let ready = vec![
            ReadyIdentity {
                account_id: "a".into(),
                address: "111@c.us".into(),
            },
            ReadyIdentity {
                account_id: "b".into(),
                address: "222@c.us".into(),
            },
        ];
        // Account A's identity shows up as the sender on B's session.
        let m = msg("b", "111@c.us", "111@c.us");
        assert_eq!(
            screen(&m, &ready),
            Some(DropReason::ManagedPeer {
                peer_account: "a".into()
            })
        );
    }

    #[test]
    fn own_identity_in_snapshot_does_not_drop_foreign_sender() {
        // The account's own entry is not a loop; only *other* accounts are.
        let ready = vec![ReadyIdentity {
            account_id: "a".into(),
            address: "111@c.us".into(),
        }];
        let m = msg("a", "555@c.us", "555@c.us");
        assert_eq!(screen(&m, &ready), None);
    }
}
