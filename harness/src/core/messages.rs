//! Protocol messages carried inside free-text agent replies.
//!
//! Every message is prose for a human reader plus tagged blocks (see
//! [`crate::core::codec`]) that the receiving role actually parses:
//!
//! - [`AssessmentRequest`]: launcher → evaluator.
//! - [`TaskRequest`]: evaluator → performer, inside `<task_request>`.
//! - [`ExecutionArtifact`]: performer → evaluator, inside `<video_artifact>`.
//! - [`AssessmentReport`]: evaluator → launcher, inside `<assessment_result>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::codec::{Envelope, decode, encode, require};
use crate::core::task::{Difficulty, TaskConfigFile, TaskSpec, TaskType};
use crate::error::{HarnessError, ProtocolError};

pub const TASK_REQUEST_TAG: &str = "task_request";
pub const TASK_CONFIG_TAG: &str = "task_config";
pub const ARTIFACT_TAG: &str = "video_artifact";
pub const RESULT_TAG: &str = "assessment_result";

pub const DEFAULT_MAX_STEPS: u32 = 12_000;

const ARTIFACT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/video_artifact/v1.schema.json"
));

/// Launcher → evaluator: which performer to assess on which task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentRequest {
    pub performer_url: String,
    pub task_name: Option<String>,
    pub difficulty: Difficulty,
    pub max_steps: u32,
    pub task_type: TaskType,
}

impl AssessmentRequest {
    pub fn to_message(&self) -> String {
        let mut message = format!(
            "Your task is to assess the agent at:\n{}\n\nPlease evaluate the following task:\n",
            encode("performer_url", &self.performer_url)
        );
        if let Some(name) = &self.task_name {
            message.push_str(&encode("task_name", name));
            message.push('\n');
        }
        for (tag, value) in [
            ("difficulty", self.difficulty.to_string()),
            ("max_steps", self.max_steps.to_string()),
            ("task_type", self.task_type.to_string()),
        ] {
            message.push_str(&encode(tag, &value));
            message.push('\n');
        }
        message
    }

    pub fn from_message(text: &str) -> Result<Self, HarnessError> {
        let envelope = decode(text);
        let performer_url = envelope
            .get("performer_url")
            .or_else(|| envelope.get("white_agent_url"))
            .filter(|url| !url.is_empty())
            .cloned()
            .ok_or_else(|| HarnessError::missing_tag("performer_url"))?;
        let task_type = match envelope.get("task_type") {
            Some(value) => parse_field("task_type", value)?,
            None => TaskType::Predefined,
        };
        let task_name = envelope.get("task_name").filter(|name| !name.is_empty()).cloned();
        if task_name.is_none() && !task_type.is_generated() {
            return Err(HarnessError::missing_tag("task_name"));
        }
        Ok(Self {
            performer_url,
            task_name,
            difficulty: optional_field(&envelope, "difficulty")?.unwrap_or_default(),
            max_steps: optional_field(&envelope, "max_steps")?.unwrap_or(DEFAULT_MAX_STEPS),
            task_type,
        })
    }
}

/// Where the performer finds a task's init commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskConfigSource {
    /// Config file readable by the performer (predefined tasks).
    Path(PathBuf),
    /// Config embedded in the request (generated tasks).
    Inline(TaskConfigFile),
}

/// Evaluator → performer: run one task and return its recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub task_name: String,
    pub difficulty: Difficulty,
    pub description: String,
    pub max_steps: u32,
    pub config: TaskConfigSource,
}

impl TaskRequest {
    /// Build a request for a resolved task. File-backed tasks travel by path,
    /// generated ones inline.
    pub fn for_task(task: &TaskSpec, config_path: Option<&Path>, max_steps: u32) -> Self {
        let config = match config_path {
            Some(path) => TaskConfigSource::Path(path.to_path_buf()),
            None => TaskConfigSource::Inline(task.to_config_file()),
        };
        Self {
            task_name: task.name.clone(),
            difficulty: task.difficulty,
            description: task.description.clone(),
            max_steps,
            config,
        }
    }

    pub fn to_message(&self) -> Result<String, serde_yaml::Error> {
        let mut body = format!(
            "Please complete the following task and submit the video recording.\n\n\
             Task Name: {}\nDifficulty: {}\nDescription: {}\nMax Steps: {}\n",
            self.task_name,
            self.difficulty,
            self.description.replace('\n', " "),
            self.max_steps,
        );
        match &self.config {
            TaskConfigSource::Path(path) => {
                body.push_str(&format!("\nTask Configuration Path: {}\n", path.display()));
            }
            TaskConfigSource::Inline(file) => {
                let yaml = serde_yaml::to_string(file)?;
                body.push('\n');
                body.push_str(&encode(TASK_CONFIG_TAG, &yaml));
                body.push('\n');
            }
        }
        body.push_str(
            "\nWhen finished, reply with a video_artifact block holding a JSON object with \
             video_path, video_base64, task_name, difficulty, steps_taken, completed and timestamp.",
        );
        Ok(encode(TASK_REQUEST_TAG, &body))
    }

    pub fn from_message(text: &str) -> Result<Self, HarnessError> {
        let envelope = decode(text);
        let body = require(&envelope, TASK_REQUEST_TAG)?;
        let inner = decode(body);

        let mut fields = BTreeMap::new();
        for line in strip_block(body, TASK_CONFIG_TAG).lines() {
            let line = line.trim();
            for key in [
                "Task Name",
                "Difficulty",
                "Description",
                "Max Steps",
                "Task Configuration Path",
            ] {
                if let Some(value) = line
                    .strip_prefix(key)
                    .and_then(|rest| rest.strip_prefix(':'))
                {
                    fields.insert(key, value.trim().to_string());
                }
            }
        }

        let task_name = fields
            .get("Task Name")
            .filter(|name| !name.is_empty())
            .cloned()
            .ok_or_else(|| missing_field("Task Name"))?;
        let difficulty = match fields.get("Difficulty") {
            Some(value) => parse_field("Difficulty", value)?,
            None => Difficulty::Simple,
        };
        let max_steps = match fields.get("Max Steps") {
            Some(value) => parse_field("Max Steps", value)?,
            None => DEFAULT_MAX_STEPS,
        };
        let config = match (inner.get(TASK_CONFIG_TAG), fields.get("Task Configuration Path")) {
            (Some(yaml), _) => {
                let file: TaskConfigFile =
                    serde_yaml::from_str(yaml).map_err(|err| ProtocolError::InvalidField {
                        field: TASK_CONFIG_TAG.to_string(),
                        value: err.to_string(),
                    })?;
                TaskConfigSource::Inline(file)
            }
            (None, Some(path)) if !path.is_empty() => TaskConfigSource::Path(PathBuf::from(path)),
            _ => return Err(missing_field("Task Configuration Path")),
        };
        let description = fields
            .get("Description")
            .cloned()
            .unwrap_or_else(|| task_name.clone());

        Ok(Self {
            task_name,
            difficulty,
            description,
            max_steps,
            config,
        })
    }
}

/// Recording reference carried by an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRef<'a> {
    Inline(&'a str),
    Path(&'a Path),
}

/// Performer → evaluator: the outcome of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionArtifact {
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub video_base64: Option<String>,
    pub task_name: String,
    pub difficulty: Difficulty,
    pub steps_taken: u64,
    pub completed: bool,
    #[serde(default)]
    pub timestamp: f64,
}

impl ExecutionArtifact {
    /// Inline bytes take precedence over a path.
    pub fn video_ref(&self) -> Option<VideoRef<'_>> {
        if let Some(encoded) = self.video_base64.as_deref().filter(|data| !data.is_empty()) {
            return Some(VideoRef::Inline(encoded));
        }
        self.video_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(|path| VideoRef::Path(Path::new(path)))
    }

    pub fn to_reply(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!(
            "Task execution complete!\n\nTask: {}\nDifficulty: {}\nSteps Taken: {}\nCompleted: {}\n\
             Video saved to: {}\n\n{}\n",
            self.task_name,
            self.difficulty,
            self.steps_taken,
            self.completed,
            self.video_path.as_deref().unwrap_or("-"),
            encode(ARTIFACT_TAG, &json)
        ))
    }

    /// Decode, schema-check and deserialize the artifact in a performer reply.
    pub fn from_reply(text: &str) -> Result<Self, HarnessError> {
        let envelope = decode(text);
        let payload = envelope
            .get(ARTIFACT_TAG)
            .ok_or(ProtocolError::MissingArtifact)?;
        let value: Value = serde_json::from_str(payload).map_err(malformed)?;
        validate_artifact(&value)?;
        let artifact: Self = serde_json::from_value(value).map_err(malformed)?;
        Ok(artifact)
    }
}

fn validate_artifact(value: &Value) -> Result<(), HarnessError> {
    let schema: Value = serde_json::from_str(ARTIFACT_SCHEMA).map_err(malformed)?;
    let compiled = validator_for(&schema).map_err(|err| malformed(format!("schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(malformed(messages.join("; ")));
    }
    Ok(())
}

/// Evaluator → launcher: scores for one assessed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentReport {
    pub task_name: String,
    pub difficulty: Difficulty,
    pub performer_url: String,
    pub video_path: String,
    pub steps_taken: u64,
    pub task_completed: bool,
    pub scores: BTreeMap<String, u32>,
    pub overall_score: Option<f64>,
    pub feedback: String,
    pub timestamp: String,
}

impl AssessmentReport {
    pub fn to_reply(&self) -> Result<String, serde_json::Error> {
        let scores = serde_json::to_string_pretty(&self.scores)?;
        let full = serde_json::to_string_pretty(self)?;
        Ok(format!(
            "Assessment Complete!\n\nTask: {} ({})\nTask Completed: {}\nSteps Taken: {}\n\n\
             Evaluation Scores:\n{}\n\n{}\n",
            self.task_name,
            self.difficulty,
            self.task_completed,
            self.steps_taken,
            scores,
            encode(RESULT_TAG, &full)
        ))
    }

    pub fn from_reply(text: &str) -> Result<Self, HarnessError> {
        let envelope = decode(text);
        let payload = require(&envelope, RESULT_TAG)?;
        serde_json::from_str(payload).map_err(|err| {
            HarnessError::Protocol(ProtocolError::InvalidField {
                field: RESULT_TAG.to_string(),
                value: err.to_string(),
            })
        })
    }
}

fn strip_block(text: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    match (text.find(&open), text.find(&close)) {
        (Some(start), Some(end)) if end > start => {
            format!("{}{}", &text[..start], &text[end + close.len()..])
        }
        _ => text.to_string(),
    }
}

fn optional_field<T: std::str::FromStr>(
    envelope: &Envelope,
    tag: &str,
) -> Result<Option<T>, HarnessError> {
    envelope
        .get(tag)
        .map(|value| parse_field(tag, value))
        .transpose()
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, HarnessError> {
    value.trim().parse().map_err(|_| {
        HarnessError::Protocol(ProtocolError::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        })
    })
}

fn missing_field(field: &str) -> HarnessError {
    HarnessError::Protocol(ProtocolError::MissingField {
        field: field.to_string(),
    })
}

fn malformed(err: impl ToString) -> HarnessError {
    HarnessError::Protocol(ProtocolError::MalformedArtifact {
        reason: err.to_string(),
    })
}
