//! Numeric scores pulled out of free-text assessments.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("integer pattern should compile"));

/// Metrics the assessment prompt asks the scoring model to rate.
pub const DEFAULT_METRICS: [&str; 6] = [
    "Task Progress",
    "Action Control",
    "Error Recognition and Correction",
    "Creative Attempts",
    "Task Completion Efficiency",
    "Material Selection and Usage",
];

pub type ScoreMap = BTreeMap<String, u32>;

/// Extract `metric: value` scores for each expected metric.
///
/// The first line that contains `"{metric}:"` followed by an integer wins;
/// metrics without such a line are left out rather than scored zero.
pub fn extract<S: AsRef<str>>(text: &str, metrics: &[S]) -> ScoreMap {
    let mut scores = ScoreMap::new();
    for metric in metrics {
        let metric = metric.as_ref();
        let marker = format!("{metric}:");
        let value = text.lines().find_map(|line| {
            let start = line.find(&marker)? + marker.len();
            INTEGER
                .find(&line[start..])
                .and_then(|digits| digits.as_str().parse::<u32>().ok())
        });
        if let Some(value) = value {
            scores.insert(metric.to_string(), value);
        }
    }
    scores
}

/// Unweighted mean of whatever was extracted; `None` when nothing was.
pub fn overall(scores: &ScoreMap) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let total: f64 = scores.values().map(|value| f64::from(*value)).sum();
    Some(total / scores.len() as f64)
}
