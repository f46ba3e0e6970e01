//! Serde model of the recognition provider's live websocket messages.
//!
//! The duplex transport itself lives outside this crate; whatever owns the
//! socket deserializes each frame here and hands the converted
//! [`RecognitionEvent`] to the session manager. Keeping the provider's
//! schema behind this module means the lifecycle engine never sees it.

use serde::Deserialize;

use super::{RecognitionEvent, Word};

/// One live-result frame. The provider tags frames with a `type` field;
/// `Results` frames carry transcription, `UtteranceEnd` frames carry only
/// the boundary signal.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum LiveMessage {
    Results(ResultsMessage),
    UtteranceEnd(UtteranceEndMessage),
    #[serde(other)]
    Unhandled,
}

#[derive(Debug, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct UtteranceEndMessage {
    #[serde(default)]
    pub last_word_end: f64,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub words: Vec<WireWord>,
}

#[derive(Debug, Deserialize)]
pub struct WireWord {
    pub speaker: Option<i64>,
    #[serde(default)]
    pub punctuated_word: String,
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

impl ResultsMessage {
    /// Convert the best alternative into the engine's event type. Frames
    /// without alternatives yield `None`.
    pub fn to_event(&self) -> Option<RecognitionEvent> {
        let alt = self.channel.alternatives.first()?;
        let words = alt
            .words
            .iter()
            .map(|w| Word {
                speaker: w.speaker,
                punctuated_word: if w.punctuated_word.is_empty() {
                    w.word.clone()
                } else {
                    w.punctuated_word.clone()
                },
                start: w.start,
                end: w.end,
            })
            .collect();

        Some(RecognitionEvent {
            transcript: alt.transcript.clone(),
            is_final: self.is_final,
            speech_final: self.speech_final,
            words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_frame_into_event() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "speech_final": false,
            "channel": {
                "alternatives": [{
                    "transcript": "hello world",
                    "words": [
                        {"speaker": 0, "word": "hello", "punctuated_word": "Hello", "start": 0.0, "end": 0.5},
                        {"speaker": 0, "word": "world", "punctuated_word": "world", "start": 0.5, "end": 1.0}
                    ]
                }]
            }
        }"#;

        let msg: LiveMessage = serde_json::from_str(raw).unwrap();
        let LiveMessage::Results(results) = msg else {
            panic!("expected Results frame");
        };
        let event = results.to_event().unwrap();
        assert!(event.is_final);
        assert!(!event.speech_final);
        assert_eq!(event.transcript, "hello world");
        assert_eq!(event.words.len(), 2);
        assert_eq!(event.words[0].punctuated_word, "Hello");
        assert_eq!(event.words[0].speaker, Some(0));
    }

    #[test]
    fn falls_back_to_plain_word_when_punctuated_missing() {
        let raw = r#"{
            "type": "Results",
            "is_final": false,
            "channel": {
                "alternatives": [{
                    "transcript": "hel",
                    "words": [{"word": "hel", "start": 0.0, "end": 0.2}]
                }]
            }
        }"#;

        let msg: LiveMessage = serde_json::from_str(raw).unwrap();
        let LiveMessage::Results(results) = msg else {
            panic!("expected Results frame");
        };
        let event = results.to_event().unwrap();
        assert_eq!(event.words[0].punctuated_word, "hel");
        assert_eq!(event.words[0].speaker, None);
    }

    #[test]
    fn parses_utterance_end_frame() {
        let raw = r#"{"type": "UtteranceEnd", "last_word_end": 4.2}"#;
        let msg: LiveMessage = serde_json::from_str(raw).unwrap();
        let LiveMessage::UtteranceEnd(ue) = msg else {
            panic!("expected UtteranceEnd frame");
        };
        assert_eq!(ue.last_word_end, 4.2);
    }

    #[test]
    fn unknown_frame_types_are_tolerated() {
        let raw = r#"{"type": "Metadata"}"#;
        let msg: LiveMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, LiveMessage::Unhandled));
    }

    #[test]
    fn results_without_alternatives_yield_no_event() {
        let raw = r#"{"type": "Results", "is_final": true, "channel": {"alternatives": []}}"#;
        let msg: LiveMessage = serde_json::from_str(raw).unwrap();
        let LiveMessage::Results(results) = msg else {
            panic!("expected Results frame");
        };
        assert!(results.to_event().is_none());
    }
}
