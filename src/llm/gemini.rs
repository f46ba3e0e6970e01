use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Client, Message, Role, MAX_COMPLETION_TOKENS};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini generate-content client. System messages become the
/// request's `systemInstruction`; assistant turns map to the `model` role.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .filter(|url| !url.is_empty())
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

fn text_content(role: &str, text: &str) -> Content {
    Content {
        role: Some(role.to_string()),
        parts: vec![Part {
            text: text.to_string(),
        }],
    }
}

#[async_trait]
impl Client for GeminiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let mut system_instruction = None;
        let mut contents = Vec::new();
        for message in messages {
            match message.role {
                Role::System => {
                    system_instruction = Some(Content {
                        role: None,
                        parts: vec![Part {
                            text: message.content.clone(),
                        }],
                    });
                }
                Role::User => contents.push(text_content("user", &message.content)),
                Role::Assistant => contents.push(text_content("model", &message.content)),
            }
        }

        if !messages.iter().any(|m| m.role == Role::User) {
            bail!("gemini: no user message provided");
        }

        let request = GenerateRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: MAX_COMPLETION_TOKENS,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("gemini request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("gemini completion: {status}: {body}");
        }

        let parsed: GenerateResponse = response.json().await.context("gemini response body")?;

        let mut text = String::new();
        for candidate in &parsed.candidates {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    text.push_str(&part.text);
                }
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("gemini: empty response text");
        }
        Ok(text)
    }
}
