use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task;
use tracing::warn;

use crate::session;
use crate::transcript::Segment;

use super::{SqliteStore, SummaryStatus};

/// Plain-text mirror of the transcript: one markdown file per UTC day,
/// one line per segment. Greppable without touching the database.
pub struct TranscriptLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, seg: &Segment) -> std::io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.md", seg.timestamp.format("%Y-%m-%d")));

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)?;
        writeln!(file, "{}", seg.format_markdown())
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.md", Utc::now().format("%Y-%m-%d")))
    }
}

/// Store decorator that mirrors every appended segment into a
/// [`TranscriptLog`]. Mirror failures are logged, never fatal — the
/// database remains the source of truth.
pub struct LoggedStore {
    inner: Arc<SqliteStore>,
    log: Arc<TranscriptLog>,
}

impl LoggedStore {
    pub fn new(inner: Arc<SqliteStore>, log: Arc<TranscriptLog>) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl session::Store for LoggedStore {
    async fn create_session(&self, id: &str, started_at: DateTime<Utc>) -> Result<()> {
        Ok(self.inner.create_session(id, started_at).await?)
    }

    async fn end_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        audio_path: &str,
    ) -> Result<()> {
        Ok(self.inner.end_session(id, ended_at, audio_path).await?)
    }

    async fn append_segment(&self, session_id: &str, seg: &Segment) -> Result<()> {
        self.inner.append_segment(session_id, seg).await?;

        let log = Arc::clone(&self.log);
        let seg = seg.clone();
        task::spawn_blocking(move || {
            if let Err(err) = log.append(&seg) {
                warn!("transcript log append failed: {err}");
            }
        });
        Ok(())
    }

    async fn get_segments(&self, session_id: &str) -> Result<Vec<Segment>> {
        Ok(self.inner.get_segments(session_id).await?)
    }

    async fn update_summary(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    ) -> Result<()> {
        Ok(self
            .inner
            .update_summary(session_id, summary, status, preset)
            .await?)
    }

    async fn claim_summary_request(&self, session_id: &str, prompt_hash: &str) -> Result<bool> {
        Ok(self
            .inner
            .claim_summary_request(session_id, prompt_hash)
            .await?)
    }
}
