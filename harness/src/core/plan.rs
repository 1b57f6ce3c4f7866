//! High-level plans and the subtask-advance state machine.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fenced json pattern should compile")
});

pub const FALLBACK_ESTIMATED_STEPS: u64 = 1000;

/// Planner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub reasoning: String,
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub current_subtask: Option<String>,
    #[serde(default)]
    pub estimated_steps: Option<u64>,
}

impl Plan {
    /// Single-subtask plan used whenever planning fails.
    pub fn fallback(task: &str, reason: &str) -> Self {
        Self {
            reasoning: format!("Error in planning: {reason}. Using simple approach."),
            subtasks: vec![task.to_string()],
            current_subtask: Some(task.to_string()),
            estimated_steps: Some(FALLBACK_ESTIMATED_STEPS),
        }
    }

    /// Parse a planner reply; blank subtasks are dropped and an empty list is an error.
    pub fn from_reply(reply: &str) -> Result<Self> {
        let value = extract_json(reply)?;
        let mut plan: Plan = serde_json::from_value(value).context("plan does not match schema")?;
        plan.subtasks = plan
            .subtasks
            .into_iter()
            .map(|subtask| subtask.trim().to_string())
            .filter(|subtask| !subtask.is_empty())
            .collect();
        if plan.subtasks.is_empty() {
            bail!("plan has no subtasks");
        }
        Ok(plan)
    }
}

/// Pull a JSON value out of a reply that may wrap it in prose or a fenced block.
pub fn extract_json(reply: &str) -> Result<Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some(block) = FENCED_JSON.captures(trimmed).and_then(|caps| caps.get(1))
        && let Ok(value) = serde_json::from_str(block.as_str().trim())
    {
        return Ok(value);
    }
    let (Some(start), Some(end)) = (trimmed.find(['{', '[']), trimmed.rfind(['}', ']'])) else {
        bail!("reply contains no JSON");
    };
    if end <= start {
        bail!("reply contains no JSON");
    }
    serde_json::from_str(&trimmed[start..=end]).context("parse JSON in reply")
}

/// Progress through one plan within an episode.
///
/// `current_index` only moves forward and never exceeds `subtasks.len()`;
/// reaching the end leaves the episode running on the overall task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanState {
    pub subtasks: Vec<String>,
    pub current_index: usize,
    pub steps_in_current: u32,
    pub max_steps_per_subtask: u32,
    pub completed_subtasks: BTreeSet<String>,
}

impl PlanState {
    pub fn new(subtasks: Vec<String>, max_steps_per_subtask: u32) -> Self {
        Self {
            subtasks,
            current_index: 0,
            steps_in_current: 0,
            max_steps_per_subtask,
            completed_subtasks: BTreeSet::new(),
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.subtasks.get(self.current_index).map(String::as_str)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_index >= self.subtasks.len()
    }

    pub fn should_advance(&self) -> bool {
        !self.is_exhausted() && self.steps_in_current >= self.max_steps_per_subtask
    }

    /// Mark the current subtask complete and move to the next one.
    ///
    /// Returns the subtask that was completed, or `None` if the plan was
    /// already exhausted.
    pub fn advance(&mut self) -> Option<String> {
        let finished = self.subtasks.get(self.current_index)?.clone();
        self.completed_subtasks.insert(finished.clone());
        self.current_index += 1;
        self.steps_in_current = 0;
        Some(finished)
    }

    /// Queue more subtasks after the existing ones; progress is kept.
    pub fn extend(&mut self, subtasks: impl IntoIterator<Item = String>) {
        self.subtasks.extend(subtasks);
        self.steps_in_current = 0;
    }

    pub fn record_step(&mut self) {
        self.steps_in_current = self.steps_in_current.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_fenced_plans() {
        let bare = r#"{"reasoning":"r","subtasks":["find tree"," ","chop"],"current_subtask":"find tree","estimated_steps":300}"#;
        let plan = Plan::from_reply(bare).expect("bare");
        assert_eq!(plan.subtasks, vec!["find tree".to_string(), "chop".to_string()]);
        assert_eq!(plan.estimated_steps, Some(300));

        let fenced = "Sure:\n```json\n{\"subtasks\": [\"a\"]}\n```";
        assert_eq!(Plan::from_reply(fenced).expect("fenced").subtasks, vec!["a".to_string()]);
    }

    #[test]
    fn empty_or_garbage_plans_fail() {
        assert!(Plan::from_reply(r#"{"subtasks": []}"#).is_err());
        assert!(Plan::from_reply("I cannot help with that").is_err());
        assert!(Plan::from_reply(r#"{"reasoning": "no list"}"#).is_err());
    }

    #[test]
    fn fallback_plan_is_the_task_itself() {
        let plan = Plan::fallback("collect wood", "timeout");
        assert_eq!(plan.subtasks, vec!["collect wood".to_string()]);
        assert_eq!(plan.estimated_steps, Some(1000));
        assert!(plan.reasoning.starts_with("Error in planning: timeout"));
    }

    #[test]
    fn advance_fires_at_threshold_and_is_bounded() {
        let mut state = PlanState::new(vec!["a".to_string(), "b".to_string()], 2);
        assert_eq!(state.current(), Some("a"));
        state.record_step();
        assert!(!state.should_advance());
        state.record_step();
        assert!(state.should_advance());

        assert_eq!(state.advance().as_deref(), Some("a"));
        assert_eq!(state.current_index, 1);
        assert_eq!(state.steps_in_current, 0);
        assert!(state.completed_subtasks.contains("a"));

        assert_eq!(state.advance().as_deref(), Some("b"));
        assert!(state.is_exhausted());
        assert_eq!(state.advance(), None);
        assert_eq!(state.current_index, 2);
        assert_eq!(state.current(), None);
    }

    #[test]
    fn extending_an_exhausted_plan_keeps_progress() {
        let mut state = PlanState::new(vec!["a".to_string()], 1);
        state.record_step();
        state.advance();
        assert!(state.is_exhausted());

        state.extend(["b".to_string(), "c".to_string()]);
        assert_eq!(state.current_index, 1);
        assert_eq!(state.current(), Some("b"));
        assert!(state.completed_subtasks.contains("a"));
        assert_eq!(state.subtasks.len(), 3);
    }

    #[test]
    fn exhausted_plan_never_asks_to_advance() {
        let mut state = PlanState::new(vec!["only".to_string()], 1);
        state.advance();
        for _ in 0..5 {
            state.record_step();
        }
        assert!(!state.should_advance());
    }
}
