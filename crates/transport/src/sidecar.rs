//! WebSocket bridge to the browser-automation sidecar.
//!
//! One WebSocket connection carries every account's traffic. A writer task
//! drains an mpsc command channel; a reader task parses sidecar events,
//! resolves pending send acknowledgements, and forwards session events to
//! the runtime's dispatch loop.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

use zapflow_common::{InboundMessage, ReplyPayload};

use crate::{
    Transport, TransportError, TransportEvent,
    types::{RuntimeCommand, SidecarEvent},
};

/// Default sidecar WebSocket port.
pub const DEFAULT_SIDECAR_PORT: u16 = 9876;

/// How long to wait for the sidecar to acknowledge a send.
const SEND_ACK_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

/// Transport implementation backed by the sidecar WebSocket.
#[derive(Clone)]
pub struct SidecarTransport {
    tx: mpsc::Sender<RuntimeCommand>,
    pending: PendingMap,
}

impl SidecarTransport {
    /// Connect to the sidecar. Returns the transport handle, the event
    /// stream for the dispatch loop, and a receiver that fires when the
    /// sidecar connection drops.
    pub async fn connect(
        port: u16,
    ) -> Result<
        (
            Self,
            mpsc::Receiver<TransportEvent>,
            oneshot::Receiver<()>,
        ),
        TransportError,
    > {
        let url = format!("ws://127.0.0.1:{port}");
        info!(url = %url, "connecting to automation sidecar");

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| TransportError::Init(e.to_string()))?;

        info!("connected to automation sidecar");

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<RuntimeCommand>(32);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        let (disconnect_tx, disconnect_rx) = oneshot::channel();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = Arc::clone(&pending);

        // Reader task: wire events in, runtime events out.
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<SidecarEvent>(&text) {
                            Ok(ev) => {
                                handle_sidecar_event(ev, &pending_reader, &event_tx).await;
                            },
                            Err(e) => {
                                warn!(error = %e, text = %text, "failed to parse sidecar event");
                            },
                        }
                    },
                    Ok(Message::Close(_)) => {
                        info!("sidecar connection closed");
                        break;
                    },
                    Ok(_) => {}, // Ignore ping/pong/binary
                    Err(e) => {
                        error!(error = %e, "WebSocket read error");
                        break;
                    },
                }
            }
            let _ = disconnect_tx.send(());
        });

        // Writer task: drain the command channel.
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match serde_json::to_string(&cmd) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            error!(error = %e, "failed to send command to sidecar");
                            break;
                        }
                        debug!(?cmd, "sent command to sidecar");
                    },
                    Err(e) => {
                        error!(error = %e, "failed to serialize command");
                    },
                }
            }
        });

        Ok((Self { tx, pending }, event_rx, disconnect_rx))
    }

    /// Connect with retries at a fixed two-second interval.
    pub async fn connect_with_retry(
        port: u16,
        max_retries: u32,
    ) -> Result<
        (
            Self,
            mpsc::Receiver<TransportEvent>,
            oneshot::Receiver<()>,
        ),
        TransportError,
    > {
        let mut attempt = 0;
        loop {
            match Self::connect(port).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(e);
                    }
                    warn!(attempt, max_retries, error = %e, "failed to connect to sidecar, retrying...");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                },
            }
        }
    }

    async fn submit(&self, cmd: RuntimeCommand) -> Result<(), TransportError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Send a command that the sidecar acknowledges with a `send_result`.
    async fn submit_tracked(
        &self,
        request_id: String,
        cmd: RuntimeCommand,
    ) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), ack_tx);

        if let Err(e) = self.submit(cmd).await {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(SEND_ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(TransportError::Send(reason)),
            // Ack channel dropped: reader task died.
            Ok(Err(_)) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                Err(TransportError::NotConnected)
            },
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                Err(TransportError::Timeout)
            },
        }
    }
}

async fn handle_sidecar_event(
    ev: SidecarEvent,
    pending: &PendingMap,
    event_tx: &mpsc::Sender<TransportEvent>,
) {
    let forwarded = match ev {
        SidecarEvent::Qr { account_id, qr } => Some(TransportEvent::Challenge {
            account_id,
            payload: qr,
        }),
        SidecarEvent::Authenticated { account_id } => {
            Some(TransportEvent::Authenticated { account_id })
        },
        SidecarEvent::Ready {
            account_id,
            self_address,
        } => Some(TransportEvent::Ready {
            account_id,
            self_address,
        }),
        SidecarEvent::Disconnected { account_id, reason } => {
            Some(TransportEvent::Disconnected { account_id, reason })
        },
        SidecarEvent::InboundMessage {
            account_id,
            message_id,
            chat,
            sender,
            sender_name,
            from_me,
            is_group,
            is_status,
            body,
            timestamp,
        } => Some(TransportEvent::Message(InboundMessage {
            account_id,
            message_id,
            chat,
            sender,
            sender_name,
            from_me,
            is_group,
            is_status,
            body,
            timestamp,
        })),
        SidecarEvent::SendResult {
            request_id,
            success,
            error,
        } => {
            let ack = pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            match ack {
                Some(tx) => {
                    let result = if success {
                        Ok(())
                    } else {
                        Err(error.unwrap_or_else(|| "send rejected".to_string()))
                    };
                    let _ = tx.send(result);
                },
                None => debug!(request_id, "send result for unknown request"),
            }
            None
        },
        SidecarEvent::Error { account_id, error } => {
            warn!(?account_id, error, "sidecar error");
            None
        },
    };

    if let Some(event) = forwarded
        && event_tx.send(event).await.is_err()
    {
        warn!("event consumer dropped, discarding transport event");
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn init_session(&self, account_id: &str) -> Result<(), TransportError> {
        self.submit(RuntimeCommand::Init {
            account_id: account_id.to_string(),
        })
        .await
    }

    async fn destroy_session(&self, account_id: &str) -> Result<(), TransportError> {
        self.submit(RuntimeCommand::Destroy {
            account_id: account_id.to_string(),
        })
        .await
    }

    async fn send(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> Result<(), TransportError> {
        let request_id = Uuid::new_v4().to_string();
        debug!(account_id, to, request_id, "sending message");

        let cmd = match &payload.media {
            Some(media) => RuntimeCommand::SendMedia {
                account_id: account_id.to_string(),
                to: to.to_string(),
                media_url: media.url.clone(),
                media_type: media_kind(&media.mime_type).to_string(),
                caption: if payload.text.is_empty() {
                    None
                } else {
                    Some(payload.text.clone())
                },
                request_id: request_id.clone(),
            },
            None => RuntimeCommand::SendText {
                account_id: account_id.to_string(),
                to: to.to_string(),
                text: payload.text.clone(),
                request_id: request_id.clone(),
            },
        };

        self.submit_tracked(request_id, cmd).await
    }
}

fn media_kind(mime_type: &str) -> &'static str {
    if mime_type.starts_with("image/") {
        "image"
    } else if mime_type.starts_with("video/") {
        "video"
    } else if mime_type.starts_with("audio/") {
        "audio"
    } else {
        "document"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_buckets() {
        assert_eq!(media_kind("image/png"), "image");
        assert_eq!(media_kind("video/mp4"), "video");
        assert_eq!(media_kind("audio/ogg"), "audio");
        assert_eq!(media_kind("application/pdf"), "document");
    }

    #[tokio::test]
    async fn lost_ack_sender_clears_pending_entry() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = SidecarTransport {
            tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        };

        // Swap the ack sender out from under the request and drop it, as a
        // reader task losing its state would.
        let pending = Arc::clone(&transport.pending);
        tokio::spawn(async move {
            let _ = rx.recv().await;
            let keys: Vec<String> = pending.lock().unwrap().keys().cloned().collect();
            for key in keys {
                let (dead_tx, _dead_rx) = oneshot::channel();
                drop(pending.lock().unwrap().insert(key, dead_tx));
            }
        });

        let err = transport
            .submit_tracked("r1".into(), RuntimeCommand::SendText {
                account_id: "acc".into(),
                to: "555@c.us".into(),
                text: "oi".into(),
                request_id: "r1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(
            transport
                .pending
                .lock()
                .unwrap()
                .is_empty(),
            "no entry may survive a dead ack channel"
        );
    }
}
