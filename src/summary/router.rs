use std::fmt::Write as _;

use tracing::warn;

use crate::config::Summarization;
use crate::llm::{self, Message};

use super::ClientFactory;

/// Asks the default model which preset fits a transcript. Selection is
/// best-effort: any failure falls back to the `default` preset (or the
/// alphabetically first one) and never propagates as an error.
pub struct Router {
    cfg: Summarization,
    factory: ClientFactory,
}

/// Build a routing excerpt from the first `first_n`, middle `mid_n`, and
/// last `last_n` whitespace-delimited words, or the whole transcript when
/// it is no longer than their sum.
pub fn sample_transcript(transcript: &str, first_n: usize, mid_n: usize, last_n: usize) -> String {
    let words: Vec<&str> = transcript.split_whitespace().collect();
    let total = words.len();

    if total <= first_n + mid_n + last_n {
        return transcript.to_string();
    }

    let first = words[..first_n].join(" ");
    let mid_start = (total - mid_n) / 2;
    let mid = words[mid_start..mid_start + mid_n].join(" ");
    let last = words[total - last_n..].join(" ");

    format!("{first}\n\n[...]\n\n{mid}\n\n[...]\n\n{last}")
}

impl Router {
    pub fn new(cfg: Summarization, factory: ClientFactory) -> Self {
        Self { cfg, factory }
    }

    pub async fn select_preset(&self, transcript: &str) -> String {
        let sampled = sample_transcript(transcript, 300, 200, 200);

        let mut preset_list = String::new();
        for (name, preset) in &self.cfg.presets {
            let _ = writeln!(preset_list, "- {}: {}", name, preset.description);
        }

        let prompt = format!(
            "Given this conversation excerpt, choose the single best summarization preset.\n\
             \n\
             Conversation excerpt:\n\
             {sampled}\n\
             \n\
             Available presets:\n\
             {preset_list}\
             Reply with ONLY the preset name, nothing else."
        );

        let (provider, model) = match llm::parse_model(&self.cfg.model) {
            Ok(parts) => parts,
            Err(err) => {
                warn!(reason = "parse model failed", %err, "router: falling back to default preset");
                return self.fallback_preset();
            }
        };

        let client = match (self.factory)(provider, model) {
            Ok(client) => client,
            Err(err) => {
                warn!(reason = "create client failed", %err, "router: falling back to default preset");
                return self.fallback_preset();
            }
        };

        let reply = match client.complete(&[Message::user(prompt)]).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(reason = "llm complete failed", %err, "router: falling back to default preset");
                return self.fallback_preset();
            }
        };

        let chosen = reply.trim();
        if self.cfg.presets.contains_key(chosen) {
            return chosen.to_string();
        }

        warn!(chosen, "router: reply is not a known preset, falling back");
        self.fallback_preset()
    }

    fn fallback_preset(&self) -> String {
        if self.cfg.presets.contains_key("default") {
            return "default".to_string();
        }
        // BTreeMap keys iterate sorted, so first is alphabetically first.
        self.cfg
            .presets
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_transcript_is_returned_whole() {
        let text = "one two three four five";
        assert_eq!(sample_transcript(text, 300, 200, 200), text);
    }

    #[test]
    fn long_transcript_is_sampled_with_separators() {
        let words: Vec<String> = (0..1000).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let sampled = sample_transcript(&text, 300, 200, 200);

        assert!(sampled.starts_with("w0 "));
        assert!(sampled.ends_with("w999"));
        assert_eq!(sampled.matches("\n\n[...]\n\n").count(), 2);

        let sampled_words = sampled
            .split_whitespace()
            .filter(|w| *w != "[...]")
            .count();
        assert_eq!(sampled_words, 700);
    }

    #[test]
    fn boundary_length_is_not_sampled() {
        let words: Vec<String> = (0..700).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        assert_eq!(sample_transcript(&text, 300, 200, 200), text);
    }
}
