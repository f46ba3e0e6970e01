use chrono::Utc;

use super::{Segment, Word, UNKNOWN_SPEAKER};

/// Fold a word sequence into contiguous speaker-turn segments.
///
/// Adjacent words with the same speaker id coalesce into one segment whose
/// text is the space-joined punctuated forms; a speaker change starts a new
/// segment. Words without attribution get [`UNKNOWN_SPEAKER`].
pub fn group_words_by_speaker(words: &[Word]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Option<Segment> = None;

    for word in words {
        let speaker = word.speaker.unwrap_or(UNKNOWN_SPEAKER);

        match current.as_mut() {
            Some(seg) if seg.speaker == speaker => {
                seg.text.push(' ');
                seg.text.push_str(&word.punctuated_word);
                seg.end_time = word.end;
            }
            _ => {
                if let Some(done) = current.take() {
                    segments.push(done);
                }
                current = Some(Segment {
                    speaker,
                    text: word.punctuated_word.clone(),
                    start_time: word.start,
                    end_time: word.end,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    if let Some(done) = current {
        segments.push(done);
    }
    segments
}
