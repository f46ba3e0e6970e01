//! Application configuration: YAML file plus `SCRIBED_*` environment
//! overrides. Secrets (API keys) are environment-only and never appear in
//! the file or in serialized form.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "SCRIBED";

const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address of the HTTP/WS server.
    pub http_addr: String,
    pub db_path: String,
    pub audio_dir: String,
    /// Directory for the per-day markdown transcript mirror; empty
    /// disables it.
    pub transcript_dir: String,
    /// Duration string, e.g. "30s", "2m".
    pub silence_timeout: String,
    pub mic_sample_rate: u32,
    /// Ordered fallback sample rates tried after the preferred one.
    pub mic_sample_rates: Vec<u32>,
    pub summarization: Summarization,
    pub transcription: Transcription,

    // Secrets: environment only.
    #[serde(skip)]
    pub transcription_api_key: String,
    #[serde(skip)]
    pub openai_api_key: String,
    #[serde(skip)]
    pub anthropic_api_key: String,
    #[serde(skip)]
    pub gemini_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Summarization {
    /// Default model as `provider/model-name`.
    pub model: String,
    /// Optional OpenAI-compatible endpoint override.
    pub base_url: String,
    pub presets: BTreeMap<String, Preset>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Preset {
    pub description: String,
    pub system_prompt: String,
    pub user_template: String,
    /// Optional per-preset model override.
    pub model: String,
}

/// Provider-side silence thresholds, passed through as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub endpointing: String,
    pub utterance_end_ms: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            db_path: "data/scribed.db".to_string(),
            audio_dir: "data/audio".to_string(),
            transcript_dir: String::new(),
            silence_timeout: "30s".to_string(),
            mic_sample_rate: 16000,
            mic_sample_rates: vec![48000, 44100, 32000, 24000],
            summarization: Summarization::default(),
            transcription: Transcription::default(),
            transcription_api_key: String::new(),
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
            gemini_api_key: String::new(),
        }
    }
}

impl Default for Summarization {
    fn default() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert(
            "default".to_string(),
            Preset {
                description:
                    "General-purpose meeting summary with key topics, decisions, and action items"
                        .to_string(),
                system_prompt: "Summarize the following office conversation transcript \
                                concisely in markdown. Include key topics, decisions made, \
                                and action items if any."
                    .to_string(),
                user_template: "{{transcript}}".to_string(),
                model: String::new(),
            },
        );
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            base_url: String::new(),
            presets,
        }
    }
}

impl Default for Transcription {
    fn default() -> Self {
        Self {
            endpointing: "300".to_string(),
            utterance_end_ms: "1500".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file (which may be absent), apply
    /// environment overrides, pull secrets from the environment, and
    /// validate. Validation problems are warnings, never errors.
    pub fn load(path: &str) -> Result<(Self, Vec<String>)> {
        let mut builder = config::Config::builder();
        if !path.is_empty() {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("mic_sample_rates")
                .try_parsing(true),
        );

        let mut cfg: Config = builder
            .build()
            .context("read configuration")?
            .try_deserialize()
            .context("parse configuration")?;

        cfg.load_secrets();
        let warnings = cfg.validate();
        Ok((cfg, warnings))
    }

    fn load_secrets(&mut self) {
        self.transcription_api_key = secret("TRANSCRIPTION_API_KEY");
        self.openai_api_key = secret("OPENAI_API_KEY");
        self.anthropic_api_key = secret("ANTHROPIC_API_KEY");
        self.gemini_api_key = secret("GEMINI_API_KEY");
    }

    /// Silence timeout as a duration, falling back to 30 s on bad input.
    pub fn silence_timeout(&self) -> Duration {
        parse_duration(&self.silence_timeout).unwrap_or(DEFAULT_SILENCE_TIMEOUT)
    }

    /// Deduplicated ordered sample rates to try: the preferred rate,
    /// configured alternatives, then the built-in ladder.
    pub fn sample_rate_candidates(&self) -> Vec<u32> {
        let hardcoded = [16000, 48000, 44100, 32000, 24000];
        let mut seen = Vec::new();
        for rate in std::iter::once(self.mic_sample_rate)
            .chain(self.mic_sample_rates.iter().copied())
            .chain(hardcoded)
        {
            if rate > 0 && !seen.contains(&rate) {
                seen.push(rate);
            }
        }
        seen
    }

    /// API key for an LLM provider name, empty when unset.
    pub fn llm_api_key(&self, provider: &str) -> &str {
        match provider {
            "openai" => &self.openai_api_key,
            "anthropic" => &self.anthropic_api_key,
            "gemini" => &self.gemini_api_key,
            _ => "",
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.transcription_api_key.is_empty() {
            warnings.push(format!(
                "Transcription API key not configured — live transcription is disabled. \
                 Set {ENV_PREFIX}_TRANSCRIPTION_API_KEY."
            ));
        }

        let mut providers = Vec::new();
        let mut check_model = |scope: String, model: &str, warnings: &mut Vec<String>| {
            match crate::llm::parse_model(model) {
                Ok((provider, _)) => {
                    if !providers.contains(&provider.to_string()) {
                        providers.push(provider.to_string());
                    }
                }
                Err(err) => warnings.push(format!("Invalid {scope} model {model:?} — {err}.")),
            }
        };

        check_model("summarization".to_string(), &self.summarization.model, &mut warnings);
        for (name, preset) in &self.summarization.presets {
            if !preset.model.trim().is_empty() {
                check_model(
                    format!("summarization preset {name:?}"),
                    &preset.model,
                    &mut warnings,
                );
            }
        }

        if !self.summarization.presets.contains_key("default") {
            warnings.push(
                "No default summarization preset configured — set summarization.presets.default."
                    .to_string(),
            );
        }

        for provider in providers {
            if self.llm_api_key(&provider).is_empty() {
                warnings.push(format!(
                    "{} API key not configured — set {ENV_PREFIX}_{}_API_KEY.",
                    provider, provider.to_uppercase()
                ));
            }
        }

        if parse_duration(&self.silence_timeout).is_none() {
            warnings.push(format!(
                "Invalid silence_timeout {:?} — using default 30s.",
                self.silence_timeout
            ));
        }

        warnings
    }
}

fn secret(name: &str) -> String {
    std::env::var(format!("{ENV_PREFIX}_{name}")).unwrap_or_default()
}

/// Parse duration strings of the form `500ms`, `30s`, `2m`, `1h`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (value, unit) = raw.split_at(split);
    let value: f64 = value.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(seconds))
}
