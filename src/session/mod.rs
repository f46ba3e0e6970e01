//! Session lifecycle engine: silence detection, utterance buffering, and
//! the manager state machine that turns recognition events into persisted,
//! speaker-attributed sessions.

mod buffer;
mod detector;
mod manager;

pub use buffer::UtteranceBuffer;
pub use detector::Detector;
pub use manager::Manager;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::SummaryStatus;
use crate::transcript::Segment;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session")]
    NoActiveSession,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Durable persistence as seen by the manager.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, id: &str, started_at: DateTime<Utc>) -> Result<()>;
    async fn end_session(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        audio_path: &str,
    ) -> Result<()>;
    async fn append_segment(&self, session_id: &str, seg: &Segment) -> Result<()>;
    async fn get_segments(&self, session_id: &str) -> Result<Vec<Segment>>;
    async fn update_summary(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    ) -> Result<()>;
    async fn claim_summary_request(&self, session_id: &str, prompt_hash: &str) -> Result<bool>;
}

/// Per-session audio capture. `end_session` finalizes encoding and returns
/// the (possibly empty) relative path of the encoded file.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start_session(&self, session_id: &str) -> Result<()>;
    async fn end_session(&self) -> Result<String>;
}

/// A summarize failure that still identifies which preset was in play, so
/// the failed status row can record it.
#[derive(Debug, Error)]
#[error("summarize (preset {preset:?}): {error}")]
pub struct SummaryFailure {
    pub preset: String,
    pub error: anyhow::Error,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize with automatic preset selection. Returns (summary, preset).
    async fn summarize(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<(String, String), SummaryFailure>;

    /// Summarize with an explicitly named preset.
    async fn summarize_with_preset(
        &self,
        session_id: &str,
        transcript: &str,
        preset: &str,
    ) -> Result<String, SummaryFailure>;
}

/// Fan-out of lifecycle events. Implementations must not block: delivery
/// is best-effort and drop-on-full.
pub trait EventBroadcaster: Send + Sync {
    fn live_transcript(&self, seg: &Segment);
    fn live_transcript_interim(&self, speaker: i64, text: &str, start_time: f64);
    fn session_started(&self, session_id: &str);
    fn session_ended(&self, session_id: &str, duration: Duration);
    fn summary_ready(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    );
}
