//! Persistence model for conversations and broadcast campaigns.

use serde::{Deserialize, Serialize};

use zapflow_common::MediaRef;

/// Direction of a logged conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Lifecycle of a broadcast campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-recipient delivery status. `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Sent,
    Failed,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A mass-send campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastJob {
    pub id: String,
    pub account_id: String,
    pub message: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    pub status: JobStatus,
    pub total_contacts: i64,
    pub sent_count: i64,
    pub failed_count: i64,
}

/// One recipient of a broadcast job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastContact {
    pub id: String,
    pub job_id: String,
    pub address: String,
    pub status: ContactStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Partial update for a broadcast job. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub sent_count: Option<i64>,
    pub failed_count: Option<i64>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Partial update for a broadcast contact.
#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub status: Option<ContactStatus>,
    pub error: Option<String>,
}
