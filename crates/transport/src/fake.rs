//! Scripted transport for tests.
//!
//! Records every call, lets tests emit transport events, and can be told to
//! fail sends to specific addresses or to fail session init.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {async_trait::async_trait, tokio::sync::mpsc};

use zapflow_common::ReplyPayload;

use crate::{Transport, TransportError, TransportEvent};

/// A message handed to [`FakeTransport::send`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub account_id: String,
    pub to: String,
    pub payload: ReplyPayload,
}

pub struct FakeTransport {
    events: mpsc::Sender<TransportEvent>,
    sent: Mutex<Vec<SentMessage>>,
    inits: Mutex<Vec<String>>,
    destroys: Mutex<Vec<String>>,
    // address -> error message returned instead of delivering
    send_failures: Mutex<HashMap<String, String>>,
    fail_init: AtomicBool,
}

impl FakeTransport {
    /// Create a transport and the event stream a dispatch loop would consume.
    pub fn new() -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, rx) = mpsc::channel(64);
        (
            Self {
                events,
                sent: Mutex::new(Vec::new()),
                inits: Mutex::new(Vec::new()),
                destroys: Mutex::new(Vec::new()),
                send_failures: Mutex::new(HashMap::new()),
                fail_init: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Emit a transport event as if the platform produced it.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn set_init_failing(&self, failing: bool) {
        self.fail_init.store(failing, Ordering::SeqCst);
    }

    /// Make sends to `address` fail with `error`.
    pub fn fail_sends_to(&self, address: &str, error: &str) {
        self.send_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string(), error.to_string());
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn init_calls(&self) -> Vec<String> {
        self.inits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn destroy_calls(&self) -> Vec<String> {
        self.destroys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn init_session(&self, account_id: &str) -> Result<(), TransportError> {
        self.inits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(account_id.to_string());
        // Yield the way a real transport call would.
        tokio::task::yield_now().await;
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(TransportError::Init("scripted init failure".into()));
        }
        Ok(())
    }

    async fn destroy_session(&self, account_id: &str) -> Result<(), TransportError> {
        self.destroys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(account_id.to_string());
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn send(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> Result<(), TransportError> {
        if let Some(err) = self
            .send_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(to)
        {
            return Err(TransportError::Send(err.clone()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMessage {
                account_id: account_id.to_string(),
                to: to.to_string(),
                payload: payload.clone(),
            });
        tokio::task::yield_now().await;
        Ok(())
    }
}
