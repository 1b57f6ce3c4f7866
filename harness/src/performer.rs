//! Performer agent: runs one assigned task in the simulator and answers with
//! the recorded episode.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::messages::{ExecutionArtifact, TaskConfigSource, TaskRequest};
use crate::core::task::TaskSpec;
use crate::error::HarnessError;
use crate::io::completion::CompletionService;
use crate::io::config::HarnessConfig;
use crate::io::mock_sim::write_placeholder_video;
use crate::io::simulator::{LaunchRequest, Simulator, SimulatorHandle, prepare, recorded_videos};
use crate::io::task_files::load_task_config;
use crate::policy::{HybridPolicy, PolicySettings};

#[derive(Debug, Clone)]
pub struct PerformerSettings {
    /// Each run records into its own `{output_dir}/{task}/run_*` directory.
    pub output_dir: PathBuf,
    pub policy: PolicySettings,
    pub progress_log_every: u32,
}

impl PerformerSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            output_dir: config.paths.output_dir.clone(),
            policy: PolicySettings::from(&config.policy),
            progress_log_every: config.policy.progress_log_every,
        }
    }
}

/// What one episode left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub video: PathBuf,
    pub steps_taken: u64,
    pub completed: bool,
    /// Produced by mock execution after the simulator failed.
    pub mock: bool,
}

pub struct PerformerAgent {
    simulator: Arc<dyn Simulator>,
    completion: Arc<dyn CompletionService>,
    settings: PerformerSettings,
}

impl PerformerAgent {
    pub fn new(
        simulator: Arc<dyn Simulator>,
        completion: Arc<dyn CompletionService>,
        settings: PerformerSettings,
    ) -> Self {
        Self {
            simulator,
            completion,
            settings,
        }
    }

    /// Answer a task request message with an artifact reply.
    #[instrument(skip_all)]
    pub fn handle(&self, text: &str) -> Result<String> {
        let request = TaskRequest::from_message(text)?;
        let config = match &request.config {
            TaskConfigSource::Path(path) => load_task_config(path)?,
            TaskConfigSource::Inline(file) => file.clone(),
        };
        let mut task = TaskSpec::from_config_file(&request.task_name, request.difficulty, config);
        if task.description == task.name && !request.description.is_empty() {
            task.description = request.description.clone();
        }
        info!(task = %task.name, difficulty = %task.difficulty, max_steps = request.max_steps, "task received");

        let episode = self.execute(&task, request.max_steps)?;
        let bytes = fs::read(&episode.video)
            .with_context(|| format!("read {}", episode.video.display()))?;
        let artifact = ExecutionArtifact {
            video_path: Some(episode.video.display().to_string()),
            video_base64: Some(STANDARD.encode(&bytes)),
            task_name: task.name.clone(),
            difficulty: task.difficulty,
            steps_taken: episode.steps_taken,
            completed: episode.completed,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        Ok(artifact.to_reply()?)
    }

    pub fn cancel(&self) -> Result<()> {
        Err(HarnessError::NotSupported {
            operation: "tasks/cancel".to_string(),
        }
        .into())
    }

    /// Run the episode, falling back to mock execution if the simulator fails.
    pub fn execute(&self, task: &TaskSpec, max_steps: u32) -> Result<EpisodeOutcome> {
        match self.run_episode(task, max_steps) {
            Ok(episode) => Ok(episode),
            Err(err) => {
                warn!(task = %task.name, err = %format!("{err:#}"), "simulator failed, using mock execution");
                self.mock_episode(&task.name, max_steps)
            }
        }
    }

    #[instrument(skip_all, fields(task = %task.name, max_steps))]
    fn run_episode(&self, task: &TaskSpec, max_steps: u32) -> Result<EpisodeOutcome> {
        let task_dir = self.settings.output_dir.join(&task.name);
        let record_dir = task_dir.join(run_dir_name());
        let mut handle = self
            .simulator
            .launch(&LaunchRequest {
                record_dir: record_dir.clone(),
            })
            .context("launch simulator")?;

        let mut policy = HybridPolicy::new(
            &task.description,
            Arc::clone(&self.completion),
            self.settings.policy,
        );
        let driven = self.drive(handle.as_mut(), &mut policy, task, max_steps);
        let closed = handle.close().context("close simulator");
        let (steps_taken, completed) = driven?;
        closed?;

        fs::create_dir_all(&task_dir)
            .with_context(|| format!("create {}", task_dir.display()))?;
        let reasoning = task_dir.join(format!("reasoning_{}.md", task.name));
        fs::write(&reasoning, policy.reasoning_summary())
            .with_context(|| format!("write {}", reasoning.display()))?;

        let video = newest_episode(&record_dir)?
            .ok_or_else(|| anyhow!("no episode recording in {}", record_dir.display()))?;
        info!(steps_taken, completed, video = %video.display(), "episode finished");
        Ok(EpisodeOutcome {
            video,
            steps_taken,
            completed,
            mock: false,
        })
    }

    fn drive(
        &self,
        handle: &mut dyn SimulatorHandle,
        policy: &mut HybridPolicy,
        task: &TaskSpec,
        max_steps: u32,
    ) -> Result<(u64, bool)> {
        let mut observation = prepare(handle, &task.init_commands)?;
        policy.initialize_plan(&observation);

        let mut steps = 0u64;
        let mut completed = false;
        while steps < u64::from(max_steps) {
            let action = policy.next_action(&observation);
            let outcome = handle
                .step(&action)
                .with_context(|| format!("step {}", steps + 1))?;
            steps += 1;
            let every = u64::from(self.settings.progress_log_every);
            if every > 0 && steps % every == 0 {
                info!(
                    steps,
                    subtask = policy.plan_state().and_then(|plan| plan.current()).unwrap_or("-"),
                    "episode progress"
                );
            }
            if outcome.is_done() {
                completed = true;
                break;
            }
            observation = outcome.observation;
        }
        policy.finish();
        Ok((steps, completed))
    }

    fn mock_episode(&self, task_name: &str, max_steps: u32) -> Result<EpisodeOutcome> {
        let video = self
            .settings
            .output_dir
            .join(task_name)
            .join(format!("mock_episode_{}.mp4", Utc::now().timestamp()));
        write_placeholder_video(&video)?;
        Ok(EpisodeOutcome {
            video,
            steps_taken: u64::from(max_steps),
            completed: true,
            mock: true,
        })
    }
}

fn run_dir_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), &id[..8])
}

/// Most recently written `episode_*.mp4` in `dir`.
fn newest_episode(dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest = None;
    for video in recorded_videos(dir)? {
        let is_episode = video
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("episode_"));
        if !is_episode {
            continue;
        }
        let modified = fs::metadata(&video)
            .and_then(|meta| meta.modified())
            .with_context(|| format!("stat {}", video.display()))?;
        if newest.as_ref().is_none_or(|(time, _)| modified >= *time) {
            newest = Some((modified, video));
        }
    }
    Ok(newest.map(|(_, video)| video))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::{Difficulty, TaskConfigFile};
    use crate::io::mock_sim::PLACEHOLDER_MP4;
    use crate::test_support::{ScriptedCompletion, ScriptedSimulator, task_spec};

    fn agent(simulator: ScriptedSimulator, output_dir: &Path) -> (PerformerAgent, Arc<ScriptedSimulator>) {
        let simulator = Arc::new(simulator);
        let agent = PerformerAgent::new(
            simulator.clone(),
            Arc::new(ScriptedCompletion::new()),
            PerformerSettings {
                output_dir: output_dir.to_path_buf(),
                policy: PolicySettings {
                    max_steps_per_subtask: 4,
                    max_replans: 1,
                },
                progress_log_every: 5,
            },
        );
        (agent, simulator)
    }

    fn inline_request(max_steps: u32) -> String {
        TaskRequest::for_task(&task_spec("collect_wood"), None, max_steps)
            .to_message()
            .expect("encode")
    }

    #[test]
    fn terminated_episode_is_completed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (agent, simulator) = agent(
            ScriptedSimulator::new().terminating_after(5),
            temp.path(),
        );
        let reply = agent.handle(&inline_request(100)).expect("handle");
        let artifact = ExecutionArtifact::from_reply(&reply).expect("artifact");

        assert_eq!(artifact.steps_taken, 5);
        assert!(artifact.completed);
        assert_eq!(artifact.task_name, "collect_wood");
        let bytes = STANDARD
            .decode(artifact.video_base64.expect("inline video"))
            .expect("base64");
        assert_eq!(bytes, PLACEHOLDER_MP4);
        assert_eq!(simulator.commands(), vec!["/give @s minecraft:iron_axe".to_string()]);
        assert_eq!(simulator.closes(), 1);

        let reasoning = fs::read_to_string(temp.path().join("collect_wood/reasoning_collect_wood.md"))
            .expect("reasoning file");
        assert!(reasoning.starts_with("# Agent Reasoning Summary"));
    }

    #[test]
    fn step_budget_ends_episode_uncompleted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (agent, _simulator) = agent(ScriptedSimulator::new(), temp.path());
        let episode = agent
            .execute(&task_spec("collect_wood"), 12)
            .expect("episode");
        assert_eq!(episode.steps_taken, 12);
        assert!(!episode.completed);
        assert!(!episode.mock);
        assert!(
            episode
                .video
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("episode_"))
        );
    }

    #[test]
    fn simulator_failure_falls_back_to_mock_execution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (agent, _simulator) = agent(
            ScriptedSimulator::new().failing_on("iron_axe"),
            temp.path(),
        );
        let episode = agent
            .execute(&task_spec("collect_wood"), 300)
            .expect("episode");
        assert!(episode.mock);
        assert!(episode.completed);
        assert_eq!(episode.steps_taken, 300);
        assert!(episode.video.exists());
    }

    #[test]
    fn earlier_recordings_are_never_reused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stale = temp.path().join("collect_wood/episode_0.mp4");
        write_placeholder_video(&stale).expect("stale video");

        let (mock_agent, _simulator) = agent(ScriptedSimulator::new().without_recording(), temp.path());
        let episode = mock_agent
            .execute(&task_spec("collect_wood"), 4)
            .expect("episode");
        assert!(episode.mock);
        assert_ne!(episode.video, stale);

        let (agent, _simulator) = agent(ScriptedSimulator::new(), temp.path());
        let first = agent.execute(&task_spec("collect_wood"), 4).expect("first run");
        let second = agent.execute(&task_spec("collect_wood"), 4).expect("second run");
        assert!(!first.mock && !second.mock);
        assert_ne!(first.video.parent(), second.video.parent());
        assert_ne!(first.video, stale);
        assert_ne!(second.video, stale);
    }

    #[test]
    fn predefined_request_reads_config_from_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = temp.path().join("build_house.yaml");
        let file = TaskConfigFile {
            text: Some("build a small house".to_string()),
            custom_init_commands: vec!["/give @s minecraft:oak_planks 64".to_string()],
        };
        fs::write(&config, serde_yaml::to_string(&file).expect("yaml")).expect("write config");
        let task = TaskSpec::from_config_file("build_house", Difficulty::Hard, file);
        let message = TaskRequest::for_task(&task, Some(&config), 3)
            .to_message()
            .expect("encode");

        let (agent, simulator) = agent(ScriptedSimulator::new(), &temp.path().join("out"));
        let artifact = ExecutionArtifact::from_reply(&agent.handle(&message).expect("handle"))
            .expect("artifact");
        assert_eq!(artifact.difficulty, Difficulty::Hard);
        assert_eq!(artifact.steps_taken, 3);
        assert_eq!(
            simulator.commands(),
            vec!["/give @s minecraft:oak_planks 64".to_string()]
        );
    }

    #[test]
    fn request_without_task_block_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (agent, simulator) = agent(ScriptedSimulator::new(), temp.path());
        let err = agent.handle("please play minecraft").expect_err("no task");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::Protocol(_))
        ));
        assert_eq!(simulator.launches(), 0);
    }

    #[test]
    fn cancel_is_not_supported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (agent, _simulator) = agent(ScriptedSimulator::new(), temp.path());
        let err = agent.cancel().expect_err("unsupported");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::NotSupported { .. })
        ));
    }
}
