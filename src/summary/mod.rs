//! Summarization orchestrator: preset selection, template rendering, and
//! retried LLM completion.

mod router;

pub use router::{sample_transcript, Router};

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use crate::config::Summarization;
use crate::llm::{self, Message};
use crate::session::{self, SummaryFailure};

/// Builds an LLM client for a `(provider, model)` pair. Injected so tests
/// can substitute stub clients and so API keys stay at the composition
/// root.
pub type ClientFactory =
    Arc<dyn Fn(&str, &str) -> anyhow::Result<Arc<dyn llm::Client>> + Send + Sync>;

/// Transcripts shorter than this many whitespace-delimited words are not
/// worth a model call; they summarize to the empty string.
const MIN_TRANSCRIPT_WORDS: usize = 20;

const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(16),
];

pub struct Summarizer {
    cfg: Summarization,
    factory: ClientFactory,
    router: Option<Router>,
    backoff: Vec<Duration>,
}

impl Summarizer {
    pub fn new(cfg: Summarization, factory: ClientFactory) -> Self {
        let router = if cfg.presets.len() > 1 {
            Some(Router::new(cfg.clone(), Arc::clone(&factory)))
        } else {
            None
        };
        Self {
            cfg,
            factory,
            router,
            backoff: RETRY_BACKOFF.to_vec(),
        }
    }

    /// Replace the retry backoff schedule (tests use zero delays).
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn presets(&self) -> &std::collections::BTreeMap<String, crate::config::Preset> {
        &self.cfg.presets
    }

    /// Summarize with automatic preset selection. Router failures fall
    /// back to a preset and are never surfaced.
    pub async fn summarize(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<(String, String), SummaryFailure> {
        let preset = self.select_preset(transcript).await;
        let summary = self
            .summarize_with_preset(session_id, transcript, &preset)
            .await?;
        Ok((summary, preset))
    }

    /// Summarize with a named preset. Short transcripts return an empty
    /// summary without any model call.
    pub async fn summarize_with_preset(
        &self,
        _session_id: &str,
        transcript: &str,
        preset_name: &str,
    ) -> Result<String, SummaryFailure> {
        if transcript.split_whitespace().count() < MIN_TRANSCRIPT_WORDS {
            return Ok(String::new());
        }

        let Some(preset) = self.cfg.presets.get(preset_name) else {
            return Err(failure(
                preset_name,
                anyhow!("unknown preset {preset_name:?}"),
            ));
        };

        let model = if preset.model.is_empty() {
            &self.cfg.model
        } else {
            &preset.model
        };
        let (provider, model_name) =
            llm::parse_model(model).map_err(|err| failure(preset_name, err))?;
        let client = (self.factory)(provider, model_name)
            .map_err(|err| failure(preset_name, err.context("create llm client")))?;

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let user_content = preset
            .user_template
            .replace("{{transcript}}", transcript)
            .replace("{{date}}", &date);

        let messages = [
            Message::system(preset.system_prompt.clone()),
            Message::user(user_content),
        ];

        let mut last_err = None;
        for (attempt, delay) in self.backoff.iter().enumerate() {
            match client.complete(&messages).await {
                Ok(result) => return Ok(result),
                Err(err) => last_err = Some(err),
            }
            if attempt < self.backoff.len() - 1 {
                tokio::time::sleep(*delay).await;
            }
        }

        Err(failure(
            preset_name,
            last_err
                .unwrap_or_else(|| anyhow!("no attempts made"))
                .context("summarize failed after retries"),
        ))
    }

    async fn select_preset(&self, transcript: &str) -> String {
        match &self.router {
            Some(router) => router.select_preset(transcript).await,
            // Single-preset configurations skip routing entirely.
            None => self
                .cfg
                .presets
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
        }
    }
}

fn failure(preset: &str, error: anyhow::Error) -> SummaryFailure {
    SummaryFailure {
        preset: preset.to_string(),
        error,
    }
}

#[async_trait]
impl session::Summarizer for Summarizer {
    async fn summarize(
        &self,
        session_id: &str,
        transcript: &str,
    ) -> Result<(String, String), SummaryFailure> {
        Summarizer::summarize(self, session_id, transcript).await
    }

    async fn summarize_with_preset(
        &self,
        session_id: &str,
        transcript: &str,
        preset: &str,
    ) -> Result<String, SummaryFailure> {
        Summarizer::summarize_with_preset(self, session_id, transcript, preset).await
    }
}
