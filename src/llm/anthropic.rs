use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Client, Message, Role, MAX_COMPLETION_TOKENS};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages-API client. System messages are lifted out of the
/// message list into the request's top-level `system` field.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
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

#[async_trait]
impl Client for AnthropicClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let mut system_parts = Vec::new();
        let mut chat = Vec::new();
        for message in messages {
            match message.role {
                Role::System => system_parts.push(message.content.as_str()),
                Role::User => chat.push(ChatMessage {
                    role: "user",
                    content: &message.content,
                }),
                Role::Assistant => chat.push(ChatMessage {
                    role: "assistant",
                    content: &message.content,
                }),
            }
        }

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_COMPLETION_TOKENS,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            messages: chat,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .context("anthropic request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("anthropic completion: {status}: {body}");
        }

        let parsed: MessagesResponse =
            response.json().await.context("anthropic response body")?;

        let mut text = String::new();
        for block in &parsed.content {
            if block.block_type == "text" {
                text.push_str(&block.text);
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("anthropic: empty response content");
        }
        Ok(text)
    }
}
