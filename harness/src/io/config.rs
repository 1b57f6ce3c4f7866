//! Harness configuration (`craftbench.toml`).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::scoring::DEFAULT_METRICS;

/// Harness configuration (TOML).
///
/// Every section is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub paths: PathsConfig,
    pub timeouts: TimeoutsConfig,
    pub llm: LlmConfig,
    pub policy: PolicyConfig,
    pub scoring: ScoringConfig,
    pub generation: GenerationConfig,
    pub mock: MockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Predefined tasks, laid out as `{difficulty}/{name}.yaml`.
    pub task_configs_dir: PathBuf,
    /// Grading criteria, one `{task}.txt` per task.
    pub criteria_dir: PathBuf,
    /// Generation prompt templates and `atomic_task_list.txt`.
    pub generation_dir: PathBuf,
    /// Performer recordings and evaluator video copies.
    pub output_dir: PathBuf,
    /// Session registry recordings, one directory per agent id.
    pub recordings_dir: PathBuf,
    /// Batch results written by the launcher.
    pub results_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            task_configs_dir: PathBuf::from("task_configs"),
            criteria_dir: PathBuf::from("criteria_files"),
            generation_dir: PathBuf::from("task_generation"),
            output_dir: PathBuf::from("output"),
            recordings_dir: env::temp_dir().join("mcu_recordings"),
            results_dir: PathBuf::from("results"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// How long to wait for an agent card before giving up.
    pub ready_secs: u64,
    pub ready_poll_interval_ms: u64,
    /// Evaluator → performer task round-trip.
    pub request_secs: u64,
    /// Launcher → evaluator round-trip in launch/batch mode.
    pub batch_request_secs: u64,
    pub completion_secs: u64,
    pub frame_extract_secs: u64,
    /// Pause between batch items.
    pub batch_pause_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            ready_secs: 30,
            ready_poll_interval_ms: 1000,
            request_secs: 600,
            batch_request_secs: 2400,
            completion_secs: 120,
            frame_extract_secs: 300,
            batch_pause_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_steps: u32,
    pub max_steps_per_subtask: u32,
    /// Extra planning rounds allowed once a plan runs out of subtasks.
    pub max_replans: u32,
    pub progress_log_every: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_steps: 12_000,
            max_steps_per_subtask: 500,
            max_replans: 1,
            progress_log_every: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScoringConfig {
    pub metrics: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenerationConfig {
    pub denylist: Vec<String>,
    /// Added to `denylist` when sampling compositional tasks.
    pub compositional_denylist: Vec<String>,
    pub compositional_count: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            denylist: ["circuit", "redstone", "repair", "rename", "combine"]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            compositional_denylist: vec!["craft".to_string()],
            compositional_count: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MockConfig {
    /// Steps after which the mock simulator truncates an episode (0 = never).
    pub horizon: u32,
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        for (name, value) in [
            ("timeouts.ready_secs", t.ready_secs),
            ("timeouts.ready_poll_interval_ms", t.ready_poll_interval_ms),
            ("timeouts.request_secs", t.request_secs),
            ("timeouts.batch_request_secs", t.batch_request_secs),
            ("timeouts.completion_secs", t.completion_secs),
            ("timeouts.frame_extract_secs", t.frame_extract_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.policy.max_steps == 0 {
            return Err(anyhow!("policy.max_steps must be > 0"));
        }
        if self.policy.max_steps_per_subtask == 0 {
            return Err(anyhow!("policy.max_steps_per_subtask must be > 0"));
        }
        if self.scoring.metrics.is_empty() {
            return Err(anyhow!("scoring.metrics must be a non-empty array"));
        }
        if !(1..=3).contains(&self.generation.compositional_count) {
            return Err(anyhow!("generation.compositional_count must be 1, 2 or 3"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(anyhow!("llm.model must be set"));
        }
        Ok(())
    }

    /// Denied keywords for a sampling pass.
    pub fn denylist(&self, compositional: bool) -> Vec<String> {
        let mut keywords = self.generation.denylist.clone();
        if compositional {
            keywords.extend(self.generation.compositional_denylist.iter().cloned());
        }
        keywords
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
