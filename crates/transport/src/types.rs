//! Wire types for the automation sidecar.

use serde::{Deserialize, Serialize};

/// Commands sent from the runtime to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeCommand {
    Init {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Destroy {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    SendText {
        #[serde(rename = "accountId")]
        account_id: String,
        to: String,
        text: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SendMedia {
        #[serde(rename = "accountId")]
        account_id: String,
        to: String,
        #[serde(rename = "mediaUrl")]
        media_url: String,
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

/// Events received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    Qr {
        #[serde(rename = "accountId")]
        account_id: String,
        qr: String,
    },
    Authenticated {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Ready {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "selfAddress")]
        self_address: Option<String>,
    },
    Disconnected {
        #[serde(rename = "accountId")]
        account_id: String,
        reason: String,
    },
    InboundMessage {
        #[serde(rename = "accountId")]
        account_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
        chat: String,
        sender: String,
        #[serde(rename = "senderName")]
        sender_name: Option<String>,
        #[serde(rename = "fromMe", default)]
        from_me: bool,
        #[serde(rename = "isGroup", default)]
        is_group: bool,
        #[serde(rename = "isStatus", default)]
        is_status: bool,
        body: String,
        #[serde(default)]
        timestamp: f64,
    },
    SendResult {
        #[serde(rename = "requestId")]
        request_id: String,
        success: bool,
        error: Option<String>,
    },
    Error {
        #[serde(rename = "accountId")]
        account_id: Option<String>,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_with_camel_case_fields() {
        let cmd = RuntimeCommand::SendText {
            account_id: "acc1".into(),
            to: "555@c.us".into(),
            text: "oi".into(),
            request_id: "r1".into(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "send_text");
        assert_eq!(json["accountId"], "acc1");
        assert_eq!(json["requestId"], "r1");
    }

    #[test]
    fn inbound_event_defaults_optional_flags() {
        let json = r#"{
            "type": "inbound_message",
            "accountId": "acc1",
            "messageId": "m1",
            "chat": "555@c.us",
            "sender": "555@c.us",
            "senderName": null,
            "body": "oi"
        }"#;
        let ev: SidecarEvent = serde_json::from_str(json).unwrap();
        match ev {
            SidecarEvent::InboundMessage {
                from_me,
                is_group,
                is_status,
                ..
            } => {
                assert!(!from_me);
                assert!(!is_group);
                assert!(!is_status);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
