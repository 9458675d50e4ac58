//! Broadcast campaign dispatcher.
//!
//! Each running job gets one ticker task; ticks are strictly sequential for
//! a job, which is what rate-limits outbound traffic against platform abuse
//! limits. Per-contact send failures are counted and the job continues;
//! a persistence failure stops the job (circuit breaker, configurable).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    zapflow_common::ReplyPayload,
    zapflow_sessions::SessionManager,
    zapflow_store::{ContactPatch, ContactStatus, JobPatch, JobStatus, Store, StoreError},
};

/// What to do when the store fails during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreErrorPolicy {
    /// Mark the job failed and stop its ticker.
    #[default]
    FailJob,
    /// Skip the tick and try again on the next one.
    SkipTick,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between consecutive sends of one job.
    pub tick_interval: Duration,
    pub on_store_error: StoreErrorPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            on_store_error: StoreErrorPolicy::FailJob,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {id} is {status:?} and cannot be started")]
    NotStartable { id: String, status: JobStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Stop,
}

/// Drives broadcast jobs. At most one ticker exists per job id.
pub struct BroadcastDispatcher {
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    config: DispatcherConfig,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl BroadcastDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionManager>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a ticker is currently registered for a job.
    pub fn is_active(&self, job_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(job_id)
    }

    /// Start (or resume) dispatching a job. No-op when a ticker is already
    /// registered for this job id.
    pub async fn start(self: &Arc<Self>, job_id: &str) -> Result<(), BroadcastError> {
        {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(job_id) {
                debug!(job_id, "dispatcher already running for job");
                return Ok(());
            }
        }

        let job = self
            .store
            .get_broadcast_job(job_id)
            .await?
            .ok_or_else(|| BroadcastError::NotFound(job_id.to_string()))?;
        match job.status {
            JobStatus::Pending | JobStatus::Paused | JobStatus::Running => {},
            status => {
                return Err(BroadcastError::NotStartable {
                    id: job_id.to_string(),
                    status,
                });
            },
        }

        self.store
            .update_broadcast_job(job_id, JobPatch::status(JobStatus::Running))
            .await?;

        let token = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            // A racing start may have registered while we touched the store.
            if active.contains_key(job_id) {
                return Ok(());
            }
            active.insert(job_id.to_string(), token.clone());
        }

        info!(job_id, account_id = %job.account_id, "broadcast dispatch started");

        let dispatcher = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dispatcher.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if dispatcher.run_tick(&job_id).await == TickOutcome::Stop {
                            break;
                        }
                    },
                }
            }
            dispatcher
                .active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&job_id);
            debug!(job_id, "broadcast ticker stopped");
        });

        Ok(())
    }

    /// Request a pause. The ticker observes the status on its next tick and
    /// stops itself; an in-flight send is allowed to complete.
    pub async fn pause(&self, job_id: &str) -> Result<(), BroadcastError> {
        let job = self
            .store
            .get_broadcast_job(job_id)
            .await?
            .ok_or_else(|| BroadcastError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Running {
            return Err(BroadcastError::NotStartable {
                id: job_id.to_string(),
                status: job.status,
            });
        }
        self.store
            .update_broadcast_job(job_id, JobPatch::status(JobStatus::Paused))
            .await?;
        info!(job_id, "broadcast pause requested");
        Ok(())
    }

    /// Delete a job. The store refuses while the job is running; callers
    /// must pause first.
    pub async fn delete(&self, job_id: &str) -> Result<(), BroadcastError> {
        self.store.delete_broadcast_job(job_id).await?;
        info!(job_id, "broadcast job deleted");
        Ok(())
    }

    async fn on_store_error(&self, job_id: &str, err: StoreError) -> TickOutcome {
        match self.config.on_store_error {
            StoreErrorPolicy::FailJob => {
                warn!(job_id, error = %err, "store error, failing broadcast job");
                // Best effort: the store that just failed may refuse this too.
                if let Err(e) = self
                    .store
                    .update_broadcast_job(job_id, JobPatch::status(JobStatus::Failed))
                    .await
                {
                    warn!(job_id, error = %e, "could not persist failed status");
                }
                TickOutcome::Stop
            },
            StoreErrorPolicy::SkipTick => {
                warn!(job_id, error = %err, "store error, skipping tick");
                TickOutcome::Continue
            },
        }
    }

    async fn run_tick(&self, job_id: &str) -> TickOutcome {
        let job = match self.store.get_broadcast_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id, "job vanished, stopping dispatch");
                return TickOutcome::Stop;
            },
            Err(e) => return self.on_store_error(job_id, e).await,
        };

        // External pause or delete since the last tick.
        if job.status != JobStatus::Running {
            debug!(job_id, status = ?job.status, "job no longer running, stopping dispatch");
            return TickOutcome::Stop;
        }

        let contact = match self.store.next_pending_contact(job_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                info!(
                    job_id,
                    sent = job.sent_count,
                    failed = job.failed_count,
                    "broadcast completed"
                );
                if let Err(e) = self
                    .store
                    .update_broadcast_job(job_id, JobPatch::status(JobStatus::Completed))
                    .await
                {
                    warn!(job_id, error = %e, "could not persist completed status");
                }
                return TickOutcome::Stop;
            },
            Err(e) => return self.on_store_error(job_id, e).await,
        };

        let payload = ReplyPayload {
            text: job.message.clone(),
            media: job.media.clone(),
        };

        let (contact_patch, job_patch) = match self
            .sessions
            .send(&job.account_id, &contact.address, &payload)
            .await
        {
            Ok(()) => {
                debug!(job_id, to = %contact.address, "broadcast message sent");
                (
                    ContactPatch {
                        status: Some(ContactStatus::Sent),
                        error: None,
                    },
                    JobPatch {
                        sent_count: Some(job.sent_count + 1),
                        ..JobPatch::default()
                    },
                )
            },
            Err(e) => {
                // Per-recipient failure: count it and keep going.
                warn!(job_id, to = %contact.address, error = %e, "broadcast send failed");
                (
                    ContactPatch {
                        status: Some(ContactStatus::Failed),
                        error: Some(e.to_string()),
                    },
                    JobPatch {
                        failed_count: Some(job.failed_count + 1),
                        ..JobPatch::default()
                    },
                )
            },
        };

        if let Err(e) = self.store.update_contact(&contact.id, contact_patch).await {
            return self.on_store_error(job_id, e).await;
        }
        if let Err(e) = self.store.update_broadcast_job(job_id, job_patch).await {
            return self.on_store_error(job_id, e).await;
        }

        TickOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use {
        zapflow_sessions::SessionManagerConfig,
        zapflow_store::memory::MemoryStore,
        zapflow_transport::{Transport, TransportEvent, fake::FakeTransport},
    };

    async fn ready_runtime() -> (
        Arc<BroadcastDispatcher>,
        Arc<SessionManager>,
        Arc<FakeTransport>,
        Arc<MemoryStore>,
    ) {
        let (transport, _events) = FakeTransport::new();
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store) as Arc<dyn Store>,
            SessionManagerConfig::default(),
        ));
        sessions.create("acc").await;
        sessions
            .handle_event(TransportEvent::Ready {
                account_id: "acc".into(),
                self_address: Some("111@c.us".into()),
            })
            .await;

        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&sessions),
            DispatcherConfig {
                tick_interval: Duration::from_millis(10),
                on_store_error: StoreErrorPolicy::FailJob,
            },
        ));
        (dispatcher, sessions, transport, store)
    }

    async fn wait_for_status(store: &MemoryStore, job_id: &str, status: JobStatus) {
        for _ in 0..200 {
            if let Ok(Some(job)) = store.get_broadcast_job(job_id).await
                && job.status == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached {status:?}");
    }

    #[tokio::test]
    async fn partial_failure_still_completes_with_counts() {
        let (dispatcher, _, transport, store) = ready_runtime().await;
        transport.fail_sends_to("2@c.us", "number not on platform");
        let job = store
            .create_broadcast_job(
                "acc",
                "promo!",
                None,
                &["1@c.us".into(), "2@c.us".into(), "3@c.us".into()],
            )
            .await
            .unwrap();

        dispatcher.start(&job.id).await.unwrap();
        wait_for_status(&store, &job.id, JobStatus::Completed).await;

        let done = store.get_broadcast_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.sent_count, 2);
        assert_eq!(done.failed_count, 1);
        assert_eq!(done.total_contacts, 3);

        let contacts = store.contacts_for_job(&job.id);
        assert_eq!(contacts[0].status, ContactStatus::Sent);
        assert_eq!(contacts[1].status, ContactStatus::Failed);
        assert_eq!(
            contacts[1].error.as_deref(),
            Some("send failed: number not on platform")
        );
        assert_eq!(contacts[2].status, ContactStatus::Sent);
        assert!(!dispatcher.is_active(&job.id));
    }

    #[tokio::test]
    async fn duplicate_start_does_not_double_send() {
        let (dispatcher, _, transport, store) = ready_runtime().await;
        let job = store
            .create_broadcast_job("acc", "hi", None, &["1@c.us".into(), "2@c.us".into()])
            .await
            .unwrap();

        dispatcher.start(&job.id).await.unwrap();
        dispatcher.start(&job.id).await.unwrap();
        wait_for_status(&store, &job.id, JobStatus::Completed).await;

        assert_eq!(transport.sent_messages().len(), 2);
    }

    #[tokio::test]
    async fn pause_stops_ticker_and_resume_finishes() {
        let (dispatcher, _, _, store) = ready_runtime().await;
        let contacts: Vec<String> = (0..50).map(|i| format!("{i}@c.us")).collect();
        let job = store
            .create_broadcast_job("acc", "hi", None, &contacts)
            .await
            .unwrap();

        dispatcher.start(&job.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        dispatcher.pause(&job.id).await.unwrap();
        wait_for_status(&store, &job.id, JobStatus::Paused).await;

        // Ticker deregisters itself shortly after observing the pause.
        for _ in 0..100 {
            if !dispatcher.is_active(&job.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!dispatcher.is_active(&job.id));
        let paused = store.get_broadcast_job(&job.id).await.unwrap().unwrap();
        assert!(paused.sent_count < paused.total_contacts);

        dispatcher.start(&job.id).await.unwrap();
        wait_for_status(&store, &job.id, JobStatus::Completed).await;
        let done = store.get_broadcast_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.sent_count, done.total_contacts);
    }

    #[tokio::test]
    async fn delete_refused_while_running() {
        let (dispatcher, _, _, store) = ready_runtime().await;
        let contacts: Vec<String> = (0..50).map(|i| format!("{i}@c.us")).collect();
        let job = store
            .create_broadcast_job("acc", "hi", None, &contacts)
            .await
            .unwrap();
        dispatcher.start(&job.id).await.unwrap();

        let err = dispatcher.delete(&job.id).await.unwrap_err();
        assert!(matches!(err, BroadcastError::Store(StoreError::Rejected(_))));

        dispatcher.pause(&job.id).await.unwrap();
        wait_for_status(&store, &job.id, JobStatus::Paused).await;
        dispatcher.delete(&job.id).await.unwrap();
        assert!(store.get_broadcast_job(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_error_fails_job_under_default_policy() {
        let (dispatcher, _, _, store) = ready_runtime().await;
        let job = store
            .create_broadcast_job("acc", "hi", None, &["1@c.us".into()])
            .await
            .unwrap();
        store
            .update_broadcast_job(&job.id, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();

        store.set_failing(true);
        assert_eq!(dispatcher.run_tick(&job.id).await, TickOutcome::Stop);

        // Once the store recovers, the job was not completed behind our back.
        store.set_failing(false);
        let after = store.get_broadcast_job(&job.id).await.unwrap().unwrap();
        assert_eq!(after.sent_count, 0);
    }

    #[tokio::test]
    async fn store_error_skips_tick_under_lenient_policy() {
        let (_, sessions, _, store) = ready_runtime().await;
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            sessions,
            DispatcherConfig {
                tick_interval: Duration::from_millis(10),
                on_store_error: StoreErrorPolicy::SkipTick,
            },
        ));
        let job = store
            .create_broadcast_job("acc", "hi", None, &["1@c.us".into()])
            .await
            .unwrap();
        store
            .update_broadcast_job(&job.id, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();

        store.set_failing(true);
        assert_eq!(dispatcher.run_tick(&job.id).await, TickOutcome::Continue);

        store.set_failing(false);
        assert_eq!(dispatcher.run_tick(&job.id).await, TickOutcome::Continue);
        let after = store.get_broadcast_job(&job.id).await.unwrap().unwrap();
        assert_eq!(after.sent_count, 1);
    }

    #[tokio::test]
    async fn not_ready_session_counts_contacts_as_failed() {
        let (transport, _events) = FakeTransport::new();
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store) as Arc<dyn Store>,
            SessionManagerConfig::default(),
        ));
        // No session created: every send is NotReady.
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            sessions,
            DispatcherConfig {
                tick_interval: Duration::from_millis(10),
                on_store_error: StoreErrorPolicy::FailJob,
            },
        ));
        let job = store
            .create_broadcast_job("acc", "hi", None, &["1@c.us".into(), "2@c.us".into()])
            .await
            .unwrap();

        dispatcher.start(&job.id).await.unwrap();
        wait_for_status(&store, &job.id, JobStatus::Completed).await;
        let done = store.get_broadcast_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.failed_count, 2);
        assert_eq!(done.sent_count, 0);
    }
}
