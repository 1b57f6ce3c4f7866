//! Task model shared by the resolver, the registry and both agent roles.

use std::fmt;
use std::str::FromStr;

use anyhow::{Error, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[default]
    Simple,
    Hard,
    Compositional,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Simple => "simple",
            Difficulty::Hard => "hard",
            Difficulty::Compositional => "compositional",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "simple" => Ok(Difficulty::Simple),
            "hard" => Ok(Difficulty::Hard),
            "compositional" => Ok(Difficulty::Compositional),
            other => Err(anyhow!(
                "unknown difficulty {other:?} (expected simple, hard or compositional)"
            )),
        }
    }
}

/// How a task is obtained: from a config file, or generated by the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Predefined,
    Atomic,
    Compositional,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Predefined => "predefined",
            TaskType::Atomic => "atomic",
            TaskType::Compositional => "compositional",
        }
    }

    pub fn is_generated(&self) -> bool {
        !matches!(self, TaskType::Predefined)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "predefined" => Ok(TaskType::Predefined),
            "atomic" => Ok(TaskType::Atomic),
            "compositional" => Ok(TaskType::Compositional),
            other => Err(anyhow!(
                "unknown task type {other:?} (expected predefined, atomic or compositional)"
            )),
        }
    }
}

/// Resolved, immutable description of a benchmark task.
///
/// Shared as `Arc<TaskSpec>` between the resolver's store, the orchestrator and
/// registry sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub init_commands: Vec<String>,
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl TaskSpec {
    /// Build a spec from a task config document found on disk.
    pub fn from_config_file(name: &str, difficulty: Difficulty, file: TaskConfigFile) -> Self {
        let description = file
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| name.to_string());
        Self {
            id: format!("{difficulty}/{name}"),
            name: name.to_string(),
            description,
            difficulty,
            init_commands: file.custom_init_commands,
            generated: false,
            thinking: None,
        }
    }

    /// The on-disk/inline document form of this spec.
    pub fn to_config_file(&self) -> TaskConfigFile {
        TaskConfigFile {
            text: Some(self.description.clone()),
            custom_init_commands: self.init_commands.clone(),
        }
    }
}

/// Per-task configuration document (`{root}/{difficulty}/{name}.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskConfigFile {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub custom_init_commands: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_parses_and_displays() {
        for value in ["simple", "hard", "compositional"] {
            let parsed: Difficulty = value.parse().expect("parse");
            assert_eq!(parsed.to_string(), value);
        }
        assert!("expert".parse::<Difficulty>().is_err());
    }

    #[test]
    fn config_file_without_text_uses_name() {
        let file = TaskConfigFile {
            text: None,
            custom_init_commands: vec!["/time set day".to_string()],
        };
        let spec = TaskSpec::from_config_file("collect_wood", Difficulty::Simple, file);
        assert_eq!(spec.id, "simple/collect_wood");
        assert_eq!(spec.description, "collect_wood");
        assert!(!spec.generated);
        assert_eq!(spec.init_commands, vec!["/time set day".to_string()]);
    }
}
