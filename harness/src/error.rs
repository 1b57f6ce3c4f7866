//! Typed failure classes shared across the harness.
//!
//! Functions return `anyhow::Result` like the rest of the crate; when a caller
//! needs to branch on the failure class (HTTP status, exit code, tests) it
//! recovers the variant with `err.downcast_ref::<HarnessError>()`.

use thiserror::Error;

/// Structural violations of the tagged message protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("missing required tag <{tag}>")]
    MissingTag { tag: String },
    #[error("expected exactly one text part, got {count}")]
    UnexpectedPartCount { count: usize },
    #[error("reply carries no <video_artifact>")]
    MissingArtifact,
    #[error("malformed video artifact: {reason}")]
    MalformedArtifact { reason: String },
    #[error("missing required field {field:?}")]
    MissingField { field: String },
    #[error("invalid value {value:?} for field {field:?}")]
    InvalidField { field: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("not found: {what}")]
    NotFound { what: String },
    #[error("could not parse generated task: {reason}")]
    GenerationParse { reason: String },
    #[error("agent at {url} not ready after {waited_secs}s")]
    AgentUnready { url: String, waited_secs: u64 },
    #[error("no active session for agent {agent_id}")]
    SessionNotFound { agent_id: String },
    #[error("agent {agent_id} already has an active session")]
    AlreadyActive { agent_id: String },
    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: String },
    #[error("{operation} is not supported")]
    NotSupported { operation: String },
}

impl HarnessError {
    pub fn missing_tag(tag: &str) -> Self {
        Self::Protocol(ProtocolError::MissingTag {
            tag: tag.to_string(),
        })
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            reason: reason.into(),
        }
    }

    /// Find the typed class anywhere in an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&HarnessError> {
        err.chain().find_map(|cause| cause.downcast_ref::<HarnessError>())
    }
}
