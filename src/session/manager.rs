use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::storage::SummaryStatus;
use crate::transcript::{group_words_by_speaker, RecognitionEvent, UNKNOWN_SPEAKER};

use super::{
    Detector, EventBroadcaster, Recorder, SessionError, Store, Summarizer, UtteranceBuffer,
};

const SESSION_ID_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Default)]
struct State {
    current: Option<ActiveSession>,
    /// Most recently issued session id, kept across session ends so a new
    /// session started within the same second gets a distinct, greater id.
    last_session_id: String,
}

#[derive(Clone)]
struct ActiveSession {
    id: String,
    started_at: DateTime<Utc>,
}

/// Central coordinator of the session lifecycle.
///
/// Consumes recognition events, buffers finalized words until utterance
/// boundaries, lazily opens a session on the first persisted segment, and
/// closes it on silence timeout, force-end, or shutdown. All collaborators
/// are called outside the state mutex; the critical sections contain no
/// I/O.
pub struct Manager {
    store: Arc<dyn Store>,
    recorder: Option<Arc<dyn Recorder>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    hub: Option<Arc<dyn EventBroadcaster>>,
    detector: Arc<Detector>,
    buffer: UtteranceBuffer,
    state: Mutex<State>,
}

impl Manager {
    pub fn new(
        store: Arc<dyn Store>,
        recorder: Option<Arc<dyn Recorder>>,
        summarizer: Option<Arc<dyn Summarizer>>,
        hub: Option<Arc<dyn EventBroadcaster>>,
        detector: Arc<Detector>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            store,
            recorder,
            summarizer,
            hub,
            detector: Arc::clone(&detector),
            buffer: UtteranceBuffer::new(),
            state: Mutex::new(State::default()),
        });

        // The timer callback holds a weak reference; dropping the manager
        // disarms session ending instead of leaking a cycle.
        let weak = Arc::downgrade(&manager);
        detector.on_session_end(move || {
            if let Some(manager) = weak.upgrade() {
                tokio::spawn(async move {
                    if let Err(err) = manager.end_current_session().await {
                        warn!("silence-triggered session end failed: {err:#}");
                    }
                });
            }
        });

        manager
    }

    /// Consume one recognition event.
    pub async fn message(&self, event: &RecognitionEvent) -> anyhow::Result<()> {
        let sentence = event.transcript.trim();
        if sentence.is_empty() {
            return Ok(());
        }

        // Interim hypothesis: live display only. No buffering, no
        // persistence, no timer activity.
        if !event.is_final {
            if let Some(hub) = &self.hub {
                let (speaker, start_time) = event
                    .words
                    .first()
                    .map(|w| (w.speaker.unwrap_or(UNKNOWN_SPEAKER), w.start))
                    .unwrap_or((UNKNOWN_SPEAKER, 0.0));
                hub.live_transcript_interim(speaker, sentence, start_time);
            }
            return Ok(());
        }

        self.buffer.add_words(&event.words);
        self.detector.on_speech();

        if event.speech_final {
            self.flush_buffer().await?;
        }
        Ok(())
    }

    /// Provider signaled an utterance boundary: flush whatever is buffered
    /// and arm the silence timer.
    pub async fn utterance_end(&self) -> anyhow::Result<()> {
        self.flush_buffer().await?;
        self.detector.on_utterance_end();
        Ok(())
    }

    /// Flush any buffered words, then end the active session.
    pub async fn force_end_session(self: &Arc<Self>) -> Result<(), SessionError> {
        self.flush_buffer().await.map_err(SessionError::Other)?;
        if self.end_current_session().await? {
            Ok(())
        } else {
            Err(SessionError::NoActiveSession)
        }
    }

    /// Re-run summarization for a stored session, optionally with an
    /// explicit preset. Claims the (session, prompt-hash) ledger entry
    /// first, so repeating the same request is a no-op.
    pub async fn resummarize(&self, session_id: &str, preset: &str) -> anyhow::Result<()> {
        let summarizer = self
            .summarizer
            .as_ref()
            .context("summarization not configured")?;

        let segments = self.store.get_segments(session_id).await?;
        let transcript = join_segments(&segments);

        let mut hasher = Sha256::new();
        hasher.update(preset.as_bytes());
        hasher.update(b"\n");
        hasher.update(transcript.as_bytes());
        let prompt_hash = format!("{:x}", hasher.finalize());

        if !self
            .store
            .claim_summary_request(session_id, &prompt_hash)
            .await?
        {
            info!(session_id, "summary request already claimed, skipping");
            return Ok(());
        }

        self.store
            .update_summary(session_id, "", SummaryStatus::Running, "")
            .await?;
        self.broadcast_summary(session_id, "", SummaryStatus::Running, "");

        let outcome = if preset.is_empty() {
            summarizer.summarize(session_id, &transcript).await
        } else {
            summarizer
                .summarize_with_preset(session_id, &transcript, preset)
                .await
                .map(|summary| (summary, preset.to_string()))
        };

        match outcome {
            Ok((summary, chosen)) => {
                self.store
                    .update_summary(session_id, &summary, SummaryStatus::Completed, &chosen)
                    .await?;
                self.broadcast_summary(session_id, &summary, SummaryStatus::Completed, &chosen);
            }
            Err(failure) => {
                warn!(session_id, "re-summarization failed: {failure}");
                self.store
                    .update_summary(session_id, "", SummaryStatus::Failed, &failure.preset)
                    .await?;
                self.broadcast_summary(session_id, "", SummaryStatus::Failed, &failure.preset);
            }
        }
        Ok(())
    }

    /// Currently active session id, if any.
    pub fn current_session(&self) -> Option<String> {
        self.lock_state().current.as_ref().map(|s| s.id.clone())
    }

    async fn flush_buffer(&self) -> anyhow::Result<()> {
        let words = self.buffer.flush();
        if words.is_empty() {
            return Ok(());
        }

        let mut segments = group_words_by_speaker(&words);
        for seg in &mut segments {
            seg.timestamp = Utc::now();
            let session_id = self.ensure_session_started(seg.timestamp).await?;

            self.store
                .append_segment(&session_id, seg)
                .await
                .context("append segment")?;

            if let Some(hub) = &self.hub {
                hub.live_transcript(seg);
            }
        }
        Ok(())
    }

    /// Return the active session id, creating a session (and starting the
    /// recorder) if none is active. `session_started` is broadcast before
    /// the caller persists or broadcasts the first segment.
    async fn ensure_session_started(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let session = {
            let mut state = self.lock_state();
            if let Some(active) = &state.current {
                return Ok(active.id.clone());
            }

            let mut started_at = now;
            let mut id = started_at.format(SESSION_ID_FORMAT).to_string();
            // Ids are second-resolution; bump past the previous session's
            // id so ids stay strictly increasing.
            while !state.last_session_id.is_empty() && id <= state.last_session_id {
                started_at += ChronoDuration::seconds(1);
                id = started_at.format(SESSION_ID_FORMAT).to_string();
            }

            let active = ActiveSession {
                id,
                started_at: now,
            };
            state.current = Some(active.clone());
            state.last_session_id = active.id.clone();
            active
        };

        if let Err(err) = self
            .store
            .create_session(&session.id, session.started_at)
            .await
        {
            self.clear_current();
            return Err(err.context("create session"));
        }

        if let Some(recorder) = &self.recorder {
            if let Err(err) = recorder.start_session(&session.id).await {
                // Roll back the row we just inserted so restart recovery
                // never sees a phantom active session.
                self.clear_current();
                if let Err(end_err) = self
                    .store
                    .end_session(&session.id, Utc::now(), "")
                    .await
                {
                    warn!(
                        session_id = %session.id,
                        "rollback of session row failed: {end_err:#}"
                    );
                }
                return Err(err.context("start audio recorder session"));
            }
        }

        info!(session_id = %session.id, "session started");
        if let Some(hub) = &self.hub {
            hub.session_started(&session.id);
        }

        Ok(session.id)
    }

    /// Close the active session if one exists. Returns whether a session
    /// was ended. On store failure the in-memory active state is kept so
    /// the session is not silently forgotten.
    pub(crate) async fn end_current_session(self: &Arc<Self>) -> anyhow::Result<bool> {
        let Some(session) = self.lock_state().current.clone() else {
            return Ok(false);
        };

        let ended_at = Utc::now();
        let mut audio_path = String::new();
        if let Some(recorder) = &self.recorder {
            audio_path = recorder
                .end_session()
                .await
                .context("end audio recorder session")?;
        }

        self.store
            .end_session(&session.id, ended_at, &audio_path)
            .await
            .context("end session")?;

        self.clear_current();

        let duration = (ended_at - session.started_at)
            .to_std()
            .unwrap_or_default();
        info!(session_id = %session.id, ?duration, "session ended");
        if let Some(hub) = &self.hub {
            hub.session_ended(&session.id, duration);
        }

        // Detached: the summary call must survive shutdown deadlines.
        let manager = Arc::clone(self);
        let session_id = session.id;
        tokio::spawn(async move {
            manager.generate_summary(&session_id).await;
        });

        Ok(true)
    }

    async fn generate_summary(&self, session_id: &str) {
        if let Err(err) = self
            .store
            .update_summary(session_id, "", SummaryStatus::Running, "")
            .await
        {
            warn!(session_id, "mark summary running failed: {err:#}");
        }
        self.broadcast_summary(session_id, "", SummaryStatus::Running, "");

        let segments = match self.store.get_segments(session_id).await {
            Ok(segments) => segments,
            Err(err) => {
                warn!(session_id, "load segments for summary failed: {err:#}");
                self.record_summary_failure(session_id, "").await;
                return;
            }
        };
        let transcript = join_segments(&segments);

        let Some(summarizer) = &self.summarizer else {
            if let Err(err) = self
                .store
                .update_summary(session_id, "", SummaryStatus::Completed, "")
                .await
            {
                warn!(session_id, "mark summary completed failed: {err:#}");
            }
            return;
        };

        match summarizer.summarize(session_id, &transcript).await {
            Ok((summary, preset)) => {
                if let Err(err) = self
                    .store
                    .update_summary(session_id, &summary, SummaryStatus::Completed, &preset)
                    .await
                {
                    warn!(session_id, "store summary failed: {err:#}");
                    self.record_summary_failure(session_id, &preset).await;
                    return;
                }
                self.broadcast_summary(session_id, &summary, SummaryStatus::Completed, &preset);
            }
            Err(failure) => {
                warn!(session_id, "summarization failed: {failure}");
                self.record_summary_failure(session_id, &failure.preset).await;
            }
        }
    }

    async fn record_summary_failure(&self, session_id: &str, preset: &str) {
        if let Err(err) = self
            .store
            .update_summary(session_id, "", SummaryStatus::Failed, preset)
            .await
        {
            warn!(session_id, "mark summary failed failed: {err:#}");
        }
        self.broadcast_summary(session_id, "", SummaryStatus::Failed, preset);
    }

    fn broadcast_summary(
        &self,
        session_id: &str,
        summary: &str,
        status: SummaryStatus,
        preset: &str,
    ) {
        if let Some(hub) = &self.hub {
            hub.summary_ready(session_id, summary, status, preset);
        }
    }

    fn clear_current(&self) {
        self.lock_state().current = None;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn join_segments(segments: &[crate::transcript::Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        let text = seg.text.trim();
        if text.is_empty() {
            continue;
        }
        out.push_str(text);
        out.push('\n');
    }
    out
}
