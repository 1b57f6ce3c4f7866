//! CLI command implementations.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use harness::core::messages::AssessmentReport;
use harness::core::task::Difficulty;
use harness::exit_codes;
use harness::io::config::HarnessConfig;
use harness::io::task_files::{list_tasks, read_task_names};
use tracing::{info, warn};

use crate::agents::server_binary;
use crate::launch::{Launcher, TaskSelection};
use crate::report::aggregate;
use crate::results::{TaskResult, batch_dir, batch_id, write_result};

/// Where and how to start the two agents.
#[derive(Debug, Clone)]
pub struct AgentSetup {
    pub host: String,
    pub evaluator_port: u16,
    pub performer_port: u16,
    pub server_bin: Option<PathBuf>,
    pub config_path: PathBuf,
}

impl AgentSetup {
    fn launcher(&self, config: &HarnessConfig) -> Result<Launcher> {
        let binary = server_binary(self.server_bin.as_deref())?;
        Ok(Launcher::new(
            binary,
            &self.host,
            (self.evaluator_port, self.performer_port),
            &self.config_path,
            config,
        ))
    }
}

/// Which tasks a batch covers.
#[derive(Debug, Clone)]
pub enum BatchTasks {
    File(PathBuf),
    All,
}

/// List predefined tasks.
pub fn list(config: &HarnessConfig, difficulty: Option<Difficulty>) -> Result<i32> {
    for task in list_tasks(&config.paths.task_configs_dir, difficulty)? {
        println!("{} {}", task.difficulty, task.name);
    }
    Ok(exit_codes::OK)
}

/// Assess a single task and print the result as `key=value` lines.
pub fn launch(config: &HarnessConfig, setup: &AgentSetup, selection: &TaskSelection) -> Result<i32> {
    if selection.task_name.is_none() && !selection.task_type.is_generated() {
        bail!("--task is required for predefined tasks");
    }
    let launcher = setup.launcher(config)?;
    info!(task = ?selection.task_name, "launching assessment");
    match launcher.assess(selection, None, "launch") {
        Ok(report) => {
            print_report(&report);
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            Ok(exit_codes::INVALID)
        }
    }
}

/// Assess tasks one after another, recording each result.
pub fn batch(
    config: &HarnessConfig,
    setup: &AgentSetup,
    tasks: &BatchTasks,
    selection: &TaskSelection,
) -> Result<i32> {
    let names = match tasks {
        BatchTasks::File(path) => read_task_names(path)?,
        BatchTasks::All => list_tasks(&config.paths.task_configs_dir, Some(selection.difficulty))?
            .into_iter()
            .map(|task| task.name)
            .collect(),
    };
    if names.is_empty() {
        bail!("batch has no tasks");
    }

    let launcher = setup.launcher(config)?;
    let id = batch_id(Utc::now());
    let dir = batch_dir(&config.paths.results_dir, &id);
    let logs = dir.join("logs");
    let pause = Duration::from_secs(config.timeouts.batch_pause_secs);
    println!("batch: id={} tasks={} results={}", id, names.len(), dir.display());

    let mut failures = 0usize;
    for (index, name) in names.iter().enumerate() {
        info!(task = %name, index = index + 1, total = names.len(), "batch task started");
        let task = TaskSelection {
            task_name: Some(name.clone()),
            ..selection.clone()
        };
        let started_at = Utc::now();
        let assessment = launcher.assess(&task, Some(&logs), name);
        let finished_at = Utc::now();

        let result =
            TaskResult::from_assessment(name, selection.difficulty, &assessment, started_at, finished_at);
        if result.outcome.is_failure() {
            failures += 1;
            warn!(task = %name, error = ?result.error, "batch task failed");
        }
        let path = write_result(&dir, &result).context("record task result")?;
        println!(
            "batch: task={} outcome={:?} overall={} result={}",
            name,
            result.outcome,
            format_score(result.overall_score),
            path.display()
        );

        if index + 1 < names.len() && !pause.is_zero() {
            thread::sleep(pause);
        }
    }

    println!("batch: id={} tasks={} failed={}", id, names.len(), failures);
    if failures > 0 {
        Ok(exit_codes::PARTIAL)
    } else {
        Ok(exit_codes::OK)
    }
}

/// Summarize a finished batch.
pub fn report(config: &HarnessConfig, batch: &str) -> Result<i32> {
    let dir = batch_dir(&config.paths.results_dir, batch);
    if !dir.is_dir() {
        bail!("batch {} not found at {}", batch, dir.display());
    }
    print_summary(batch, &dir)?;
    Ok(exit_codes::OK)
}

fn print_summary(batch: &str, dir: &Path) -> Result<()> {
    let (summary, warnings) = aggregate(dir)?;
    println!("report: batch={} tasks={}", batch, summary.tasks);
    println!(
        "report: completed={} incomplete={} error={}",
        summary.completed, summary.incomplete, summary.error
    );
    println!("report: mean_overall={}", format_score(summary.mean_overall));
    for (metric, mean) in &summary.metric_means {
        println!("report: metric {}={:.2}", metric, mean);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn print_report(report: &AssessmentReport) {
    println!("launch: task={} difficulty={}", report.task_name, report.difficulty);
    println!(
        "launch: completed={} steps={} overall={}",
        report.task_completed,
        report.steps_taken,
        format_score(report.overall_score)
    );
    for (metric, score) in &report.scores {
        println!("launch: score {}={}", metric, score);
    }
    println!("launch: video={}", report.video_path);
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "none".to_string(), |score| format!("{score:.2}"))
}
