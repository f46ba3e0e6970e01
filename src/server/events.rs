//! Wire shapes of the lifecycle event feed. Every event carries the same
//! envelope: `{type, version, timestamp}` plus type-specific fields.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

pub const EVENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub version: u32,
    pub timestamp: String,
}

impl Envelope {
    pub fn new(event_type: &'static str) -> Self {
        Self {
            event_type,
            version: EVENT_VERSION,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusChangedEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub paused: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionStartedEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionEndedEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub session_id: String,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Serialize)]
pub struct LiveTranscriptInterimEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub speaker: i64,
    pub text: String,
    pub start_time: f64,
}

#[derive(Debug, Serialize)]
pub struct LiveTranscriptEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub speaker: i64,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Serialize)]
pub struct SummaryReadyEvent {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub session_id: String,
    pub summary: String,
    pub status: crate::storage::SummaryStatus,
    pub preset: String,
}
