//! Pure pieces of task generation: candidate filtering, name composition,
//! template choice and parsing of the completion service's reply.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::core::task::{Difficulty, TaskType};
use crate::error::HarnessError;

const COMMANDS_MARKER: &str = "- custom_init_commands:\n  -";
const COMMAND_SEPARATOR: &str = "\n  -";
const DESCRIPTION_MARKER: &str = "- Task description: ";
const THINKING_MARKER: &str = "- In order to";
const BULLET_BOUNDARY: &str = "\n- ";

/// Fields recovered from a generation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfig {
    pub description: String,
    pub init_commands: Vec<String>,
    pub thinking: Option<String>,
}

/// Turns a completion-service reply into a task config.
///
/// One implementation per prompt template; a structured-output mode can be
/// added without touching the resolver.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, task_name: &str, response: &str) -> Result<GeneratedConfig, HarnessError>;
}

/// Anchor-substring parser shared by the atomic and compositional templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerParser;

impl ResponseParser for MarkerParser {
    fn parse(&self, task_name: &str, response: &str) -> Result<GeneratedConfig, HarnessError> {
        let start = response
            .find(COMMANDS_MARKER)
            .ok_or_else(|| HarnessError::GenerationParse {
                reason: "reply has no custom_init_commands list".to_string(),
            })?;
        let section = until_next_bullet(&response[start + COMMANDS_MARKER.len()..]);
        let init_commands: Vec<String> = section
            .trim()
            .split(COMMAND_SEPARATOR)
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .map(str::to_string)
            .collect();
        if init_commands.is_empty() {
            return Err(HarnessError::GenerationParse {
                reason: "custom_init_commands list is empty".to_string(),
            });
        }

        let description = response
            .find(DESCRIPTION_MARKER)
            .map(|at| until_next_bullet(response[at + DESCRIPTION_MARKER.len()..].trim()))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| task_name.to_string());

        let thinking = response
            .find(THINKING_MARKER)
            .map(|at| until_next_bullet(response[at..].trim()).trim().to_string())
            .filter(|text| !text.is_empty());

        Ok(GeneratedConfig {
            description,
            init_commands,
            thinking,
        })
    }
}

fn until_next_bullet(text: &str) -> &str {
    text.find(BULLET_BOUNDARY).map_or(text, |end| &text[..end])
}

/// Prompt template used to generate a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationTemplate {
    AtomicSimple,
    AtomicHard,
    Composition,
}

impl GenerationTemplate {
    pub fn select(task_type: TaskType, difficulty: Difficulty) -> Self {
        match (task_type, difficulty) {
            (TaskType::Compositional, _) => GenerationTemplate::Composition,
            (_, Difficulty::Hard) => GenerationTemplate::AtomicHard,
            _ => GenerationTemplate::AtomicSimple,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            GenerationTemplate::AtomicSimple => "atomic_simple_system_prompt.txt",
            GenerationTemplate::AtomicHard => "atomic_hard_system_prompt.txt",
            GenerationTemplate::Composition => "composition_system_prompt.txt",
        }
    }
}

/// Append the task line the templates expect.
pub fn compose_prompt(template: &str, task_name: &str) -> String {
    format!("{template}\nThe task I want to complete: {task_name}")
}

/// Storage name for a generated task: spaces to underscores, lowercased.
pub fn clean_task_name(raw: &str) -> String {
    raw.replace(' ', "_").to_lowercase()
}

/// Non-empty list entries that mention none of the denied keywords.
pub fn filter_candidates<S: AsRef<str>>(task_list: &str, denylist: &[S]) -> Vec<String> {
    task_list
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lowered = line.to_lowercase();
            !denylist
                .iter()
                .any(|keyword| lowered.contains(&keyword.as_ref().to_lowercase()))
        })
        .map(str::to_string)
        .collect()
}

/// Join sampled task names into one compositional task name.
///
/// Three names get two independently drawn connectors from `" and "`/`" or "`;
/// two names are always joined with `" or "`; one name is returned as is.
pub fn compose_task_names<R: Rng + ?Sized>(names: &[String], rng: &mut R) -> Option<String> {
    const CONNECTORS: [&str; 2] = [" and ", " or "];
    match names {
        [] => None,
        [only] => Some(only.clone()),
        [first, second] => Some(format!("{first} or {second}")),
        [first, rest @ ..] => {
            let mut composed = first.clone();
            for name in rest {
                let connector = CONNECTORS.choose(rng).copied().unwrap_or(" and ");
                composed.push_str(connector);
                composed.push_str(name);
            }
            Some(composed)
        }
    }
}
