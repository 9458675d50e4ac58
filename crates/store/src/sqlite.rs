//! SQLite-backed [`Store`] implementation.

use {
    sqlx::{Row, sqlite::SqlitePool},
    uuid::Uuid,
};

use {
    async_trait::async_trait,
    zapflow_common::MediaRef,
    zapflow_rules::LogicConfig,
};

use crate::{
    Store, StoreError, StoreResult,
    model::{
        BroadcastContact, BroadcastJob, ContactPatch, ContactStatus, Direction, JobPatch,
        JobStatus,
    },
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS conversations (
        id         TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        address    TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(account_id, address)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id              TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL,
        direction       TEXT NOT NULL,
        content         TEXT NOT NULL,
        from_bot        INTEGER NOT NULL,
        created_at      INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS logic_configs (
        account_id     TEXT PRIMARY KEY,
        id             TEXT NOT NULL,
        rules          TEXT NOT NULL,
        default_reply  TEXT,
        ai_fallback    INTEGER NOT NULL DEFAULT 0,
        ai_instruction TEXT,
        updated_at     INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS broadcast_jobs (
        id             TEXT PRIMARY KEY,
        account_id     TEXT NOT NULL,
        message        TEXT NOT NULL,
        media          TEXT,
        status         TEXT NOT NULL,
        total_contacts INTEGER NOT NULL,
        sent_count     INTEGER NOT NULL DEFAULT 0,
        failed_count   INTEGER NOT NULL DEFAULT 0,
        created_at     INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS broadcast_contacts (
        id      TEXT PRIMARY KEY,
        job_id  TEXT NOT NULL,
        address TEXT NOT NULL,
        status  TEXT NOT NULL,
        error   TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_contacts_job ON broadcast_contacts(job_id, status)",
];

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// SQLite store over an sqlx pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<BroadcastJob> {
    let status: String = row.try_get("status")?;
    let media: Option<String> = row.try_get("media")?;
    let media: Option<MediaRef> = match media {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    Ok(BroadcastJob {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        message: row.try_get("message")?,
        media,
        status: JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Rejected(format!("unknown job status '{status}'")))?,
        total_contacts: row.try_get("total_contacts")?,
        sent_count: row.try_get("sent_count")?,
        failed_count: row.try_get("failed_count")?,
    })
}

fn contact_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<BroadcastContact> {
    let status: String = row.try_get("status")?;
    Ok(BroadcastContact {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        address: row.try_get("address")?,
        status: ContactStatus::parse(&status)
            .ok_or_else(|| StoreError::Rejected(format!("unknown contact status '{status}'")))?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_or_create_conversation(
        &self,
        account_id: &str,
        address: &str,
    ) -> StoreResult<String> {
        if let Some(row) =
            sqlx::query("SELECT id FROM conversations WHERE account_id = ? AND address = ?")
                .bind(account_id)
                .bind(address)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(row.try_get("id")?);
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO conversations (id, account_id, address, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(account_id)
        .bind(address)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        direction: Direction,
        content: &str,
        from_bot: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, direction, content, from_bot, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(conversation_id)
        .bind(direction.as_str())
        .bind(content)
        .bind(from_bot)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_logic_config(&self, account_id: &str) -> StoreResult<Option<LogicConfig>> {
        let Some(row) = sqlx::query(
            "SELECT id, rules, default_reply, ai_fallback, ai_instruction
             FROM logic_configs WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let rules: String = row.try_get("rules")?;
        Ok(Some(LogicConfig {
            id: row.try_get("id")?,
            rules: serde_json::from_str(&rules)?,
            default_reply: row.try_get("default_reply")?,
            ai_fallback: row.try_get("ai_fallback")?,
            ai_instruction: row.try_get("ai_instruction")?,
        }))
    }

    async fn put_logic_config(&self, account_id: &str, config: &LogicConfig) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO logic_configs
                 (account_id, id, rules, default_reply, ai_fallback, ai_instruction, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
                 id = excluded.id,
                 rules = excluded.rules,
                 default_reply = excluded.default_reply,
                 ai_fallback = excluded.ai_fallback,
                 ai_instruction = excluded.ai_instruction,
                 updated_at = excluded.updated_at",
        )
        .bind(account_id)
        .bind(&config.id)
        .bind(serde_json::to_string(&config.rules)?)
        .bind(&config.default_reply)
        .bind(config.ai_fallback)
        .bind(&config.ai_instruction)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_broadcast_job(
        &self,
        account_id: &str,
        message: &str,
        media: Option<&MediaRef>,
        contacts: &[String],
    ) -> StoreResult<BroadcastJob> {
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

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO broadcast_jobs
                 (id, account_id, message, media, status, total_contacts, sent_count,
                  failed_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)",
        )
        .bind(&job.id)
        .bind(account_id)
        .bind(message)
        .bind(match media {
            Some(m) => Some(serde_json::to_string(m)?),
            None => None,
        })
        .bind(job.status.as_str())
        .bind(job.total_contacts)
        .bind(unix_now())
        .execute(&mut *tx)
        .await?;

        for address in contacts {
            sqlx::query(
                "INSERT INTO broadcast_contacts (id, job_id, address, status) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&job.id)
            .bind(address)
            .bind(ContactStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(job)
    }

    async fn get_broadcast_job(&self, job_id: &str) -> StoreResult<Option<BroadcastJob>> {
        let row = sqlx::query("SELECT * FROM broadcast_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update_broadcast_job(&self, job_id: &str, patch: JobPatch) -> StoreResult<()> {
        if let Some(status) = patch.status {
            sqlx::query("UPDATE broadcast_jobs SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(sent) = patch.sent_count {
            sqlx::query("UPDATE broadcast_jobs SET sent_count = ? WHERE id = ?")
                .bind(sent)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(failed) = patch.failed_count {
            sqlx::query("UPDATE broadcast_jobs SET failed_count = ? WHERE id = ?")
                .bind(failed)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn delete_broadcast_job(&self, job_id: &str) -> StoreResult<()> {
        let job = self
            .get_broadcast_job(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status == JobStatus::Running {
            return Err(StoreError::Rejected(
                "cannot delete a running job, pause it first".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM broadcast_contacts WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM broadcast_jobs WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn next_pending_contact(&self, job_id: &str) -> StoreResult<Option<BroadcastContact>> {
        let row = sqlx::query(
            "SELECT * FROM broadcast_contacts
             WHERE job_id = ? AND status = 'pending' ORDER BY rowid LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    async fn list_pending_contacts(&self, job_id: &str) -> StoreResult<Vec<BroadcastContact>> {
        let rows = sqlx::query(
            "SELECT * FROM broadcast_contacts
             WHERE job_id = ? AND status = 'pending' ORDER BY rowid",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(contact_from_row).collect()
    }

    async fn update_contact(&self, contact_id: &str, patch: ContactPatch) -> StoreResult<()> {
        if let Some(status) = patch.status {
            sqlx::query("UPDATE broadcast_contacts SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(contact_id)
                .execute(&self.pool)
                .await?;
        }
        // `error` applies independently of `status`, like the memory store.
        sqlx::query("UPDATE broadcast_contacts SET error = ? WHERE id = ?")
            .bind(&patch.error)
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
