use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::outcome::Outcome;
use crate::results::TaskResult;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub tasks: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub error: usize,
    /// Mean over tasks that produced an overall score.
    pub mean_overall: Option<f64>,
    pub metric_means: BTreeMap<String, f64>,
}

pub fn load_result_files(batch_dir: &Path) -> Result<Vec<PathBuf>> {
    if !batch_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        fs::read_dir(batch_dir).with_context(|| format!("read {}", batch_dir.display()))?
    {
        let path = entry.context("read entry")?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn aggregate(batch_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut overall = Vec::new();
    let mut metrics: BTreeMap<String, Vec<u32>> = BTreeMap::new();

    for path in load_result_files(batch_dir)? {
        let result: TaskResult = match fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse task result"))
        {
            Ok(result) => result,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", path.display()));
                continue;
            }
        };

        summary.tasks += 1;
        match result.outcome {
            Outcome::Completed => summary.completed += 1,
            Outcome::Incomplete => summary.incomplete += 1,
            Outcome::Error => summary.error += 1,
        }
        if let Some(score) = result.overall_score {
            overall.push(score);
        }
        for (metric, score) in result.scores {
            metrics.entry(metric).or_default().push(score);
        }
    }

    summary.mean_overall = mean(&overall);
    summary.metric_means = metrics
        .into_iter()
        .filter_map(|(metric, scores)| {
            let values: Vec<f64> = scores.into_iter().map(f64::from).collect();
            mean(&values).map(|avg| (metric, avg))
        })
        .collect();
    Ok((summary, warnings))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::core::task::Difficulty;
    use tempfile::tempdir;

    use crate::results::write_result;

    fn result(name: &str, outcome: Outcome, scores: &[(&str, u32)]) -> TaskResult {
        let scores: BTreeMap<String, u32> = scores
            .iter()
            .map(|(metric, score)| (metric.to_string(), *score))
            .collect();
        let overall = if scores.is_empty() {
            None
        } else {
            Some(scores.values().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64)
        };
        TaskResult {
            task_name: name.to_string(),
            difficulty: Difficulty::Simple,
            outcome,
            overall_score: overall,
            scores,
            error: None,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: 1.0,
        }
    }

    #[test]
    fn aggregates_batch() {
        let temp = tempdir().expect("tempdir");
        write_result(
            temp.path(),
            &result(
                "collect_wood",
                Outcome::Completed,
                &[("action_control", 8), ("task_completion", 10)],
            ),
        )
        .expect("write");
        write_result(
            temp.path(),
            &result(
                "build_pillar",
                Outcome::Incomplete,
                &[("action_control", 4), ("task_completion", 2)],
            ),
        )
        .expect("write");
        write_result(temp.path(), &result("mine_iron", Outcome::Error, &[])).expect("write");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.tasks, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.incomplete, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.mean_overall, Some(6.0));
        assert_eq!(summary.metric_means.get("action_control"), Some(&6.0));
        assert_eq!(summary.metric_means.get("task_completion"), Some(&6.0));
    }

    #[test]
    fn unreadable_files_become_warnings() {
        let temp = tempdir().expect("tempdir");
        write_result(temp.path(), &result("collect_wood", Outcome::Completed, &[]))
            .expect("write");
        fs::write(temp.path().join("broken.json"), "{not json").expect("write broken");
        fs::write(temp.path().join("notes.txt"), "ignored").expect("write notes");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.tasks, 1);
        assert_eq!(summary.mean_overall, None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken.json"));
    }

    #[test]
    fn missing_batch_is_empty() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("batch-x")).expect("aggregate");
        assert_eq!(summary.tasks, 0);
        assert!(warnings.is_empty());
    }
}
