//! Durable persistence: the SQLite session store and the per-day markdown
//! transcript log.

mod log;
mod sqlite;

pub use log::{LoggedStore, TranscriptLog};
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }
}

/// Progress of summary generation for a session. Transitions are
/// pending → running → completed | failed, with a reset back to running on
/// re-summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SummaryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryStatus::Pending => "pending",
            SummaryStatus::Running => "running",
            SummaryStatus::Completed => "completed",
            SummaryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SummaryStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(SummaryStatus::Pending),
            "running" => Ok(SummaryStatus::Running),
            "completed" => Ok(SummaryStatus::Completed),
            "failed" => Ok(SummaryStatus::Failed),
            other => Err(StoreError::Corrupt(format!(
                "unknown summary status {other:?}"
            ))),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(StoreError::Corrupt(format!(
                "unknown session status {other:?}"
            ))),
        }
    }
}

/// One row of the `sessions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub summary: String,
    pub summary_status: SummaryStatus,
    pub summary_preset: String,
    pub audio_path: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("parse stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("storage task failed: {0}")]
    Background(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
