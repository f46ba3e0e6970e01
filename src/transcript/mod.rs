//! Transcript data model: recognition words, speaker-turn segments, and the
//! wire format of the streaming recognition provider.

mod segment;
pub mod wire;

pub use segment::group_words_by_speaker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker id used when the provider did not attribute a word to anyone.
pub const UNKNOWN_SPEAKER: i64 = -1;

/// A single recognized word with speaker attribution and stream-relative
/// timing. Transient: words only live between provider messages and the
/// segment grouper.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub speaker: Option<i64>,
    pub punctuated_word: String,
    /// Offset in seconds from the start of the recognition stream.
    pub start: f64,
    pub end: f64,
}

/// One speaker's contiguous turn within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: i64,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl Segment {
    /// Render the segment as a markdown transcript line, e.g.
    /// `**[14:03:22] Speaker 0:** Hello world`.
    pub fn format_markdown(&self) -> String {
        format!(
            "**[{}] Speaker {}:** {}",
            self.timestamp.format("%H:%M:%S"),
            self.speaker,
            self.text.trim()
        )
    }
}

/// Provider-agnostic recognition event consumed by the session manager.
///
/// `is_final == false` carries an interim hypothesis that may still be
/// revised. `is_final == true` is a stable chunk; `speech_final == true`
/// additionally marks the utterance as complete.
#[derive(Debug, Clone, Default)]
pub struct RecognitionEvent {
    pub transcript: String,
    pub is_final: bool,
    pub speech_final: bool,
    pub words: Vec<Word>,
}
