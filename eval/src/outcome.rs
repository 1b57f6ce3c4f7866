use harness::core::messages::AssessmentReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Assessed, and the performer finished the task.
    Completed,
    /// Assessed, but the episode ended before the task was done.
    Incomplete,
    /// No assessment came back.
    Error,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Error)
    }
}

pub fn classify_outcome(assessment: &anyhow::Result<AssessmentReport>) -> Outcome {
    match assessment {
        Ok(report) if report.task_completed => Outcome::Completed,
        Ok(_) => Outcome::Incomplete,
        Err(_) => Outcome::Error,
    }
}
