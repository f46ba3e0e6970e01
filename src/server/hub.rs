use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::session::EventBroadcaster;
use crate::storage::SummaryStatus;
use crate::transcript::Segment;

use super::events::{
    Envelope, LiveTranscriptEvent, LiveTranscriptInterimEvent, SessionEndedEvent,
    SessionStartedEvent, StatusChangedEvent, SummaryReadyEvent,
};

/// Per-subscriber channel capacity. The feed is live, not a journal: a
/// subscriber that falls this far behind starts losing events and is
/// expected to re-fetch history over the HTTP API.
const SUBSCRIBER_CAPACITY: usize = 64;

/// Fan-out broker for serialized lifecycle events.
pub struct Hub {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

/// Handle returned by [`Hub::subscribe`]: the event stream plus the id
/// needed to unsubscribe.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<String>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().insert(id, tx);
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        // Dropping the sender closes the subscriber's channel.
        self.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    /// Best-effort delivery: subscribers with a full channel drop this
    /// event rather than block the broadcaster.
    pub fn broadcast(&self, payload: &str) {
        let subscribers = self.read();
        for tx in subscribers.values() {
            let _ = tx.try_send(payload.to_string());
        }
    }

    pub fn broadcast_status_changed(&self, paused: bool) {
        self.broadcast_event(&StatusChangedEvent {
            envelope: Envelope::new("status_changed"),
            paused,
        });
    }

    fn broadcast_event<T: Serialize>(&self, event: &T) {
        match serde_json::to_string(event) {
            Ok(payload) => self.broadcast(&payload),
            Err(err) => warn!("event serialization failed: {err}"),
        }
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<u64, mpsc::Sender<String>>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, mpsc::Sender<String>>> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster for Hub {
    fn live_transcript(&self, seg: &Segment) {
        self.broadcast_event(&LiveTranscriptEvent {
            envelope: Envelope::new("live_transcript"),
            speaker: seg.speaker,
            text: seg.text.clone(),
            start_time: seg.start_time,
            end_time: seg.end_time,
        });
    }

    fn live_transcript_interim(&self, speaker: i64, text: &str, start_time: f64) {
        self.broadcast_event(&LiveTranscriptInterimEvent {
            envelope: Envelope::new("live_transcript_interim"),
            speaker,
            text: text.to_string(),
            start_time,
        });
    }

    fn session_started(&self, session_id: &str) {
        self.broadcast_event(&SessionStartedEvent {
            envelope: Envelope::new("session_started"),
            session_id: session_id.to_string(),
        });
    }

    fn session_ended(&self, session_id: &str, duration: Duration) {
        self.broadcast_event(&SessionEndedEvent {
            envelope: Envelope::new("session_ended"),
            session_id: session_id.to_string(),
            duration: duration.as_secs_f64(),
        });
    }

    fn summary_ready(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    ) {
        self.broadcast_event(&SummaryReadyEvent {
            envelope: Envelope::new("summary_ready"),
            session_id: session_id.to_string(),
            summary: summary.to_string(),
            status,
            preset: preset.to_string(),
        });
    }
}
