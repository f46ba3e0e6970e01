use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type SessionEndCallback = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    on_session_end: Option<SessionEndCallback>,
}

/// Silence detector: the single time-driven source of session ends.
///
/// `on_utterance_end` arms a single-shot timer; `on_speech` cancels it.
/// Only one timer is armed at a time — re-arming cancels the prior one.
/// When the timer expires, the registered callback runs on its own task;
/// it must tolerate racing with `on_speech`/`on_utterance_end`.
pub struct Detector {
    timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl Detector {
    pub fn new(timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        Self {
            timeout,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                timer: None,
                on_session_end: None,
            })),
        }
    }

    pub fn on_session_end(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock(&self.inner).on_session_end = Some(Arc::new(callback));
    }

    /// Speech resumed: cancel any pending session-end timer.
    pub fn on_speech(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    /// Utterance boundary reached: (re-)arm the silence timer.
    pub fn on_utterance_end(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        let generation = inner.generation;
        let timeout = self.timeout;
        let shared = Arc::clone(&self.inner);
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let callback = {
                let mut inner = lock(&shared);
                // A cancel or re-arm between expiry and this lock wins.
                if inner.generation != generation {
                    return;
                }
                inner.timer = None;
                inner.on_session_end.clone()
            };

            if let Some(callback) = callback {
                callback();
            }
        }));
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> std::sync::MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
