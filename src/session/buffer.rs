use std::sync::{Mutex, PoisonError};

use crate::transcript::Word;

/// Accumulates words from finalized recognition chunks until a
/// speech-final (or utterance-end) flush.
///
/// Providers split one utterance across several `is_final` chunks at
/// micro-pauses. Grouping speaker turns over the whole utterance instead
/// of each fragment keeps diarization usable, so words wait here until the
/// utterance completes. Interim hypotheses never enter the buffer.
#[derive(Default)]
pub struct UtteranceBuffer {
    words: Mutex<Vec<Word>>,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append words from a finalized chunk.
    pub fn add_words(&self, words: &[Word]) {
        self.lock().extend_from_slice(words);
    }

    /// Snapshot of the buffered words, leaving the buffer intact.
    pub fn words(&self) -> Vec<Word> {
        self.lock().clone()
    }

    /// Drain and return everything buffered so far.
    pub fn flush(&self) -> Vec<Word> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Word>> {
        self.words.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn word(text: &str, start: f64) -> Word {
        Word {
            speaker: Some(0),
            punctuated_word: text.to_string(),
            start,
            end: start + 0.5,
        }
    }

    #[test]
    fn flush_drains_in_arrival_order() {
        let buffer = UtteranceBuffer::new();
        buffer.add_words(&[word("hello", 0.0), word("world", 0.5)]);
        buffer.add_words(&[word("again", 1.0)]);
        assert_eq!(buffer.len(), 3);

        let words = buffer.flush();
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].punctuated_word, "hello");
        assert_eq!(words[2].punctuated_word, "again");
        assert!(buffer.is_empty());
        assert!(buffer.flush().is_empty());
    }

    #[test]
    fn words_is_non_destructive() {
        let buffer = UtteranceBuffer::new();
        buffer.add_words(&[word("one", 0.0)]);
        assert_eq!(buffer.words().len(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn concurrent_mutation_keeps_every_word() {
        let buffer = Arc::new(UtteranceBuffer::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let buffer = Arc::clone(&buffer);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    buffer.add_words(&[word(&format!("w{t}-{i}"), i as f64)]);
                    let _ = buffer.words();
                    let _ = buffer.len();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 800);
    }
}
