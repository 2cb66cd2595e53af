//! Anthropic Messages API client.

use browser_use_core::{ChatMessage, ChatModel, Error, Result, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            timeout: crate::LLM_TIMEOUT,
        }
    }

    fn endpoint_messages(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl ChatModel for AnthropicClient {
    fn name(&self) -> String {
        format!("anthropic/{}", self.model)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        // System prompts travel outside the turn list.
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let req = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: self.temperature,
            system: (!system.is_empty()).then_some(system),
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(Turn::from)
                .collect(),
        };

        let resp = self
            .client
            .post(self.endpoint_messages())
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "anthropic messages HTTP {status}: {}",
                body.trim()
            )));
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect();
        if text.is_empty() {
            return Err(Error::Llm("anthropic returned no text content".to_string()));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
}

#[derive(Debug, Serialize)]
struct Turn {
    role: &'static str,
    content: Vec<Block>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

impl From<&ChatMessage> for Turn {
    fn from(m: &ChatMessage) -> Self {
        let role = match m.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };
        let mut content: Vec<Block> = m
            .images
            .iter()
            .map(|b64| Block::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: "image/png",
                    data: b64.clone(),
                },
            })
            .collect();
        content.push(Block::Text {
            text: m.content.clone(),
        });
        Self { role, content }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
