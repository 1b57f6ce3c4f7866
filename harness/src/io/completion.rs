//! Hosted language-model completion service.
//!
//! The harness only needs one call: an ordered list of role-tagged messages in,
//! one text completion out. [`OpenAiCompletion`] speaks the OpenAI-compatible
//! `/chat/completions` API over blocking HTTP.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::error::HarnessError;
use crate::io::config::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded JPEG frame.
    JpegBase64(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn user_images(frames: Vec<String>) -> Self {
        Self {
            role: Role::User,
            parts: frames.into_iter().map(ContentPart::JpegBase64).collect(),
        }
    }

    /// Concatenated text parts (image parts are skipped).
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::JpegBase64(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_wire(&self) -> Value {
        let content = match self.parts.as_slice() {
            [ContentPart::Text(text)] => Value::String(text.clone()),
            parts => Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => json!({"type": "text", "text": text}),
                        ContentPart::JpegBase64(data) => json!({
                            "type": "image_url",
                            "image_url": {"url": format!("data:image/jpeg;base64,{data}")}
                        }),
                    })
                    .collect(),
            ),
        };
        json!({"role": self.role, "content": content})
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the service for a JSON object reply.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            json_mode: false,
        }
    }

    pub fn json(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            json_mode: true,
        }
    }
}

/// Language-model completion boundary.
pub trait CompletionService: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible chat completion client.
pub struct OpenAiCompletion {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompletion {
    pub fn from_config(config: &LlmConfig, timeout: Duration) -> Result<Self> {
        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "no completion credential configured; calls will fail"
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build completion http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionService for OpenAiCompletion {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            return Err(HarnessError::unavailable("no completion API key configured").into());
        };
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(ChatMessage::to_wire).collect::<Vec<_>>(),
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, "sending completion request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .map_err(|err| HarnessError::unavailable(format!("completion request: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(HarnessError::unavailable(format!(
                "completion service returned {status}: {}",
                text.trim()
            ))
            .into());
        }
        let parsed: ChatResponse = response.json().context("decode completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response has no content"))
    }
}
