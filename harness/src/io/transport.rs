//! Agent messaging transport: capability cards and single-message exchanges.
//!
//! Agents speak JSON-RPC 2.0 over `POST /`. `message/send` carries one text
//! message and answers with a message; `tasks/cancel` exists only to be refused.
//! The capability card lives under `/.well-known/`. The wire types are shared
//! with the server side so both ends agree on field names.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::core::budget::remaining_budget;

pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";
pub const LEGACY_AGENT_CARD_PATH: &str = "/.well-known/agent.json";

pub const METHOD_SEND: &str = "message/send";
pub const METHOD_CANCEL: &str = "tasks/cancel";

pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL: i64 = -32603;
pub const CODE_NOT_SUPPORTED: i64 = -32004;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Capability descriptor an agent publishes; its presence means "ready".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub url: String,
    pub version: String,
    #[serde(default = "text_modes")]
    pub default_input_modes: Vec<String>,
    #[serde(default = "text_modes")]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

fn text_modes() -> Vec<String> {
    vec!["text/plain".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: String,
    pub parts: Vec<Part>,
    pub message_id: String,
}

impl Message {
    pub fn user_text(text: &str) -> Self {
        Self::text("user", text)
    }

    pub fn agent_text(text: &str) -> Self {
        Self::text("agent", text)
    }

    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part::Text {
                text: text.to_string(),
            }],
            message_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn text_parts(&self) -> Vec<String> {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => text.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendParams {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, message: Message) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(message),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Remote agent boundary used by the orchestrator and the launcher.
pub trait AgentTransport: Send + Sync {
    /// `Ok(None)` when the agent answered without a usable card. The whole
    /// lookup finishes within `timeout`.
    fn fetch_card(&self, url: &str, timeout: Duration) -> Result<Option<AgentCard>>;

    /// Send one text message; returns the text parts of the reply.
    fn send_message(&self, url: &str, text: &str, timeout: Duration) -> Result<Vec<String>>;
}

/// Blocking HTTP implementation of [`AgentTransport`].
pub struct HttpTransport {
    client: Client,
    card_timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        // Per-request timeouts are set on each call.
        let client = Client::builder()
            .timeout(None)
            .build()
            .context("build agent http client")?;
        Ok(Self {
            client,
            card_timeout: Duration::from_secs(2),
        })
    }
}

impl AgentTransport for HttpTransport {
    fn fetch_card(&self, url: &str, timeout: Duration) -> Result<Option<AgentCard>> {
        let base = url.trim_end_matches('/');
        let deadline = Instant::now() + timeout;
        for path in [AGENT_CARD_PATH, LEGACY_AGENT_CARD_PATH] {
            let Some(remaining) = remaining_budget(deadline, Instant::now()) else {
                break;
            };
            let response = self
                .client
                .get(format!("{base}{path}"))
                .timeout(remaining.min(self.card_timeout))
                .send()
                .with_context(|| format!("fetch agent card from {base}"))?;
            if response.status().is_success()
                && let Ok(card) = response.json::<AgentCard>()
            {
                return Ok(Some(card));
            }
        }
        Ok(None)
    }

    #[instrument(skip_all, fields(url = %url, timeout_secs = timeout.as_secs()))]
    fn send_message(&self, url: &str, text: &str, timeout: Duration) -> Result<Vec<String>> {
        let request = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Value::String(Uuid::new_v4().to_string()),
            method: METHOD_SEND.to_string(),
            params: serde_json::to_value(SendParams {
                message: Message::user_text(text),
            })?,
        };
        debug!(bytes = text.len(), "sending message");
        let response = self
            .client
            .post(format!("{}/", url.trim_end_matches('/')))
            .timeout(timeout)
            .json(&request)
            .send()
            .with_context(|| format!("send message to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("agent at {url} returned {status}"));
        }
        let reply: RpcResponse = response.json().context("decode agent reply")?;
        if let Some(error) = reply.error {
            return Err(anyhow!(
                "agent at {url} answered with error {}: {}",
                error.code,
                error.message
            ));
        }
        let message = reply
            .result
            .ok_or_else(|| anyhow!("agent at {url} sent neither result nor error"))?;
        debug!(parts = message.parts.len(), "reply received");
        Ok(message.text_parts())
    }
}
