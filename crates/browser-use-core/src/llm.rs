use crate::config::AgentSettings;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64-encoded PNG images attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_image(mut self, png_base64: impl Into<String>) -> Self {
        self.images.push(png_base64.into());
        self
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// `provider/model`, for logs.
    fn name(&self) -> String;
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmSpec {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
}

impl From<&AgentSettings> for LlmSpec {
    fn from(s: &AgentSettings) -> Self {
        Self {
            provider: s.model_provider.clone(),
            model: s.model_name.clone(),
            temperature: s.temperature,
        }
    }
}

/// Turns a provider/model choice into a usable model handle, or fails fast.
pub trait LlmResolver: Send + Sync {
    fn resolve(&self, spec: &LlmSpec) -> Result<Arc<dyn ChatModel>>;
}
