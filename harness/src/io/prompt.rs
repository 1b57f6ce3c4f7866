//! Prompt rendering for the planner, the action mapper and the video judge.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::actions::PRIMITIVES;

const PLANNER_SYSTEM: &str = include_str!("prompts/planner_system.md");
const PLANNER_USER: &str = include_str!("prompts/planner_user.md");
const MAPPER_SYSTEM: &str = include_str!("prompts/mapper_system.md");
const MAPPER_USER: &str = include_str!("prompts/mapper_user.md");
const ASSESSMENT_SYSTEM: &str = include_str!("prompts/assessment_system.md");
const ASSESSMENT_USER: &str = include_str!("prompts/assessment_user.md");

/// System + user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("planner_system", PLANNER_SYSTEM),
            ("planner_user", PLANNER_USER),
            ("mapper_system", MAPPER_SYSTEM),
            ("mapper_user", MAPPER_USER),
            ("assessment_system", ASSESSMENT_SYSTEM),
            ("assessment_user", ASSESSMENT_USER),
        ] {
            env.add_template(name, source)
                .expect("bundled prompt template should be valid");
        }
        Self { env }
    }

    pub fn planner(
        &self,
        task: &str,
        inventory_json: &str,
        position: &str,
        completed: &[String],
    ) -> Result<PromptPair> {
        Ok(PromptPair {
            system: self.env.get_template("planner_system")?.render(context! {})?,
            user: self.env.get_template("planner_user")?.render(context! {
                task => task.trim(),
                inventory => inventory_json,
                position => position,
                completed => completed,
            })?,
        })
    }

    pub fn mapper(&self, subtask: &str, state_summary: &str) -> Result<PromptPair> {
        let primitives: Vec<&str> = PRIMITIVES.iter().map(|(name, _)| *name).collect();
        Ok(PromptPair {
            system: self.env.get_template("mapper_system")?.render(context! {
                primitives => primitives,
            })?,
            user: self.env.get_template("mapper_user")?.render(context! {
                subtask => subtask.trim(),
                state => state_summary.trim(),
            })?,
        })
    }

    pub fn assessment(
        &self,
        task_name: &str,
        criteria: &str,
        metrics: &[String],
    ) -> Result<PromptPair> {
        Ok(PromptPair {
            system: self.env.get_template("assessment_system")?.render(context! {
                metrics => metrics,
            })?,
            user: self.env.get_template("assessment_user")?.render(context! {
                task_name => task_name,
                criteria => criteria.trim(),
            })?,
        })
    }
}
