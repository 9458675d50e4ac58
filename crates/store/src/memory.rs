//! In-memory [`Store`] used by tests.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {async_trait::async_trait, uuid::Uuid};

use {zapflow_common::MediaRef, zapflow_rules::LogicConfig};

use crate::{
    Store, StoreError, StoreResult,
    model::{
        BroadcastContact, BroadcastJob, ContactPatch, ContactStatus, Direction, JobPatch,
        JobStatus,
    },
};

#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub conversation_id: String,
    pub direction: Direction,
    pub content: String,
    pub from_bot: bool,
}

#[derive(Default)]
struct Inner {
    // (account_id, address) -> conversation id
    conversations: HashMap<(String, String), String>,
    messages: Vec<LoggedMessage>,
    configs: HashMap<String, LogicConfig>,
    jobs: HashMap<String, BroadcastJob>,
    // insertion order preserved per job
    contacts: Vec<BroadcastContact>,
}

/// In-memory store. Cloneable state is behind a mutex; `set_failing(true)`
/// makes every call return `StoreError::Unavailable`, which is how the
/// broadcast circuit-breaker tests script a persistence outage.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }

    /// Messages logged so far (test observer).
    pub fn logged_messages(&self) -> Vec<LoggedMessage> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).messages.clone()
    }

    /// All contacts of a job in insertion order (test observer).
    pub fn contacts_for_job(&self, job_id: &str) -> Vec<BroadcastContact> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .contacts
            .iter()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_conversation(
        &self,
        account_id: &str,
        address: &str,
    ) -> StoreResult<String> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let key = (account_id.to_string(), address.to_string());
        Ok(inner
            .conversations
            .entry(key)
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        direction: Direction,
        content: &str,
        from_bot: bool,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.messages.push(LoggedMessage {
            conversation_id: conversation_id.to_string(),
            direction,
            content: content.to_string(),
            from_bot,
        });
        Ok(())
    }

    async fn get_logic_config(&self, account_id: &str) -> StoreResult<Option<LogicConfig>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.configs.get(account_id).cloned())
    }

    async fn put_logic_config(&self, account_id: &str, config: &LogicConfig) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.configs.insert(account_id.to_string(), config.clone());
        Ok(())
    }

    async fn create_broadcast_job(
        &self,
        account_id: &str,
        message: &str,
        media: Option<&MediaRef>,
        contacts: &[String],
    ) -> StoreResult<BroadcastJob> {
        self.check_available()?;
        let job = BroadcastJob {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            message: message.to_string(),
            media: media.cloned(),
            status: JobStatus::Pending,
            total_contacts: contacts.len() as i64,
            sent_count: 0,
            failed_count: 0,
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for address in contacts {
            inner.contacts.push(BroadcastContact {
                id: Uuid::new_v4().to_string(),
                job_id: job.id.clone(),
                address: address.clone(),
                status: ContactStatus::Pending,
                error: None,
            });
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_broadcast_job(&self, job_id: &str) -> StoreResult<Option<BroadcastJob>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn update_broadcast_job(&self, job_id: &str, patch: JobPatch) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(sent) = patch.sent_count {
            job.sent_count = sent;
        }
        if let Some(failed) = patch.failed_count {
            job.failed_count = failed;
        }
        Ok(())
    }

    async fn delete_broadcast_job(&self, job_id: &str) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let job = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status == JobStatus::Running {
            return Err(StoreError::Rejected(
                "cannot delete a running job, pause it first".into(),
            ));
        }
        inner.jobs.remove(job_id);
        inner.contacts.retain(|c| c.job_id != job_id);
        Ok(())
    }

    async fn next_pending_contact(&self, job_id: &str) -> StoreResult<Option<BroadcastContact>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .contacts
            .iter()
            .find(|c| c.job_id == job_id && c.status == ContactStatus::Pending)
            .cloned())
    }

    async fn list_pending_contacts(&self, job_id: &str) -> StoreResult<Vec<BroadcastContact>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .contacts
            .iter()
            .filter(|c| c.job_id == job_id && c.status == ContactStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_contact(&self, contact_id: &str, patch: ContactPatch) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let contact = inner
            .contacts
            .iter_mut()
            .find(|c| c.id == contact_id)
            .ok_or_else(|| StoreError::NotFound(format!("contact {contact_id}")))?;
        if let Some(status) = patch.status {
            contact.status = status;
        }
        contact.error = patch.error;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conversation_ids_are_stable() {
        let store = MemoryStore::new();
        let a = store.get_or_create_conversation("acc", "555@c.us").await.unwrap();
        let b = store.get_or_create_conversation("acc", "555@c.us").await.unwrap();
        assert_eq!(a, b);
        let c = store.get_or_create_conversation("acc", "666@c.us").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn pending_contacts_keep_insertion_order() {
        let store = MemoryStore::new();
        let job = store
            .create_broadcast_job("acc", "hi", None, &["1".into(), "2".into(), "3".into()])
            .await
            .unwrap();
        let first = store.next_pending_contact(&job.id).await.unwrap().unwrap();
        assert_eq!(first.address, "1");
        store
            .update_contact(&first.id, ContactPatch {
                status: Some(ContactStatus::Sent),
                error: None,
            })
            .await
            .unwrap();
        let second = store.next_pending_contact(&job.id).await.unwrap().unwrap();
        assert_eq!(second.address, "2");
    }

    #[tokio::test]
    async fn delete_refused_while_running() {
        let store = MemoryStore::new();
        let job = store
            .create_broadcast_job("acc", "hi", None, &["1".into()])
            .await
            .unwrap();
        store
            .update_broadcast_job(&job.id, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();
        assert!(matches!(
            store.delete_broadcast_job(&job.id).await,
            Err(StoreError::Rejected(_))
        ));
        store
            .update_broadcast_job(&job.id, JobPatch::status(JobStatus::Paused))
            .await
            .unwrap();
        store.delete_broadcast_job(&job.id).await.unwrap();
        assert!(store.get_broadcast_job(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_unavailable() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(matches!(
            store.get_broadcast_job("x").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
