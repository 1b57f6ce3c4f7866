//! Per-task batch results.
//!
//! Each assessed task leaves one `{task}.json` under `results/{batch_id}/`,
//! written as soon as the task finishes so an interrupted batch keeps what it
//! already has.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use harness::core::messages::AssessmentReport;
use harness::core::task::Difficulty;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::outcome::{Outcome, classify_outcome};

/// One task's result, persisted to `{task}.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskResult {
    pub task_name: String,
    pub difficulty: Difficulty,
    pub outcome: Outcome,
    pub overall_score: Option<f64>,
    pub scores: BTreeMap<String, u32>,
    /// Why no assessment came back (`outcome == error`).
    pub error: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
}

impl TaskResult {
    pub fn from_assessment(
        task_name: &str,
        difficulty: Difficulty,
        assessment: &Result<AssessmentReport>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let outcome = classify_outcome(assessment);
        let (overall_score, scores, error) = match assessment {
            Ok(report) => (report.overall_score, report.scores.clone(), None),
            Err(err) => (None, BTreeMap::new(), Some(format!("{err:#}"))),
        };
        let duration = finished_at - started_at;
        Self {
            task_name: task_name.to_string(),
            difficulty,
            outcome,
            overall_score,
            scores,
            error,
            start_time: started_at.to_rfc3339(),
            end_time: finished_at.to_rfc3339(),
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        }
    }
}

pub fn batch_id(now: DateTime<Utc>) -> String {
    format!("batch-{}", now.format("%Y%m%d_%H%M%S"))
}

pub fn batch_dir(base_dir: &Path, batch_id: &str) -> PathBuf {
    base_dir.join(batch_id)
}

pub fn write_result(batch_dir: &Path, result: &TaskResult) -> Result<PathBuf> {
    fs::create_dir_all(batch_dir)
        .with_context(|| format!("create results dir {}", batch_dir.display()))?;
    let path = batch_dir.join(format!("{}.json", result.task_name));
    let contents = serde_json::to_string_pretty(result).context("serialize task result")?;
    fs::write(&path, format!("{contents}\n"))
        .with_context(|| format!("write result {}", path.display()))?;
    debug!(path = %path.display(), "task result written");
    Ok(path)
}
