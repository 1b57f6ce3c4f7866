//! Scripted stand-ins for the external services, for unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::actions::Action;
use crate::core::observation::{Info, Observation, Position, StepOutcome};
use crate::core::task::{Difficulty, TaskSpec};
use crate::error::HarnessError;
use crate::io::assessor::VideoAssessor;
use crate::io::completion::{CompletionRequest, CompletionService};
use crate::io::mock_sim::write_placeholder_video;
use crate::io::simulator::{LaunchRequest, Simulator, SimulatorHandle};
use crate::io::transport::{AgentCard, AgentTransport};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deterministic predefined task with one init command.
pub fn task_spec(name: &str) -> TaskSpec {
    TaskSpec {
        id: format!("simple/{name}"),
        name: name.to_string(),
        description: format!("{} in the overworld", name.replace('_', " ")),
        difficulty: Difficulty::Simple,
        init_commands: vec!["/give @s minecraft:iron_axe".to_string()],
        generated: false,
        thinking: None,
    }
}

/// Temporary workspace with `task_configs/{difficulty}/{name}.yaml`,
/// `criteria_files/{name}.txt` and `task_generation/` prompt files.
pub fn task_workspace(tasks: &[(&str, Difficulty)]) -> Result<TempDir> {
    let temp = tempfile::tempdir()?;
    for (name, difficulty) in tasks {
        let dir = temp.path().join("task_configs").join(difficulty.as_str());
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!("{name}.yaml")),
            format!(
                "text: {} in the overworld\ncustom_init_commands:\n  - /give @s minecraft:iron_axe\n",
                name.replace('_', " ")
            ),
        )?;
        let criteria = temp.path().join("criteria_files");
        fs::create_dir_all(&criteria)?;
        fs::write(
            criteria.join(format!("{name}.txt")),
            format!("Reward visible progress on {name}."),
        )?;
    }
    let generation = temp.path().join("task_generation");
    fs::create_dir_all(&generation)?;
    for template in [
        "atomic_simple_system_prompt.txt",
        "atomic_hard_system_prompt.txt",
        "composition_system_prompt.txt",
    ] {
        fs::write(generation.join(template), format!("Template {template}."))?;
    }
    fs::write(
        generation.join("atomic_task_list.txt"),
        "mine iron ore\nbuild redstone circuit\ncraft a table\n\nhunt a cow\n",
    )?;
    Ok(temp)
}

/// Completion service answering from a queue.
///
/// An empty queue answers with `ServiceUnavailable`.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, reason: impl Into<String>) {
        lock(&self.replies).push_back(Err(reason.into()));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        lock(&self.requests).push(request.clone());
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(HarnessError::unavailable("no scripted completion left").into()),
        }
    }
}

/// Agent transport whose card appears after a number of failed polls.
pub struct ScriptedTransport {
    ready_after: usize,
    polls: AtomicUsize,
    card_timeouts: Mutex<Vec<Duration>>,
    replies: Mutex<VecDeque<Result<Vec<String>, String>>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new(ready_after: usize) -> Self {
        Self {
            ready_after,
            polls: AtomicUsize::new(0),
            card_timeouts: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A transport whose card never appears.
    pub fn never_ready() -> Self {
        Self::new(usize::MAX)
    }

    pub fn push_reply(&self, parts: Vec<String>) {
        lock(&self.replies).push_back(Ok(parts));
    }

    pub fn push_error(&self, reason: impl Into<String>) {
        lock(&self.replies).push_back(Err(reason.into()));
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Timeout passed to each card fetch, in order.
    pub fn card_timeouts(&self) -> Vec<Duration> {
        lock(&self.card_timeouts).clone()
    }

    /// `(url, text)` of every message sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }
}

impl AgentTransport for ScriptedTransport {
    fn fetch_card(&self, url: &str, timeout: Duration) -> Result<Option<AgentCard>> {
        lock(&self.card_timeouts).push(timeout);
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if poll < self.ready_after {
            bail!("connection refused: {url}");
        }
        Ok(Some(AgentCard {
            name: "scripted performer".to_string(),
            description: "answers from a script".to_string(),
            url: url.to_string(),
            version: "1.0.0".to_string(),
            default_input_modes: vec!["text/plain".to_string()],
            default_output_modes: vec!["text/plain".to_string()],
            skills: Vec::new(),
        }))
    }

    fn send_message(&self, url: &str, text: &str, _timeout: Duration) -> Result<Vec<String>> {
        lock(&self.sent).push((url.to_string(), text.to_string()));
        match lock(&self.replies).pop_front() {
            Some(Ok(parts)) => Ok(parts),
            Some(Err(reason)) => Err(anyhow!(reason)),
            None => Err(anyhow!("no scripted reply for {url}")),
        }
    }
}

/// Video judge with a fixed answer.
pub struct ScriptedAssessor {
    reply: String,
    criteria_present: bool,
    assessed: Mutex<Vec<(String, PathBuf)>>,
}

impl ScriptedAssessor {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            criteria_present: true,
            assessed: Mutex::new(Vec::new()),
        }
    }

    /// Judge that reports every task as lacking criteria.
    pub fn without_criteria() -> Self {
        Self {
            criteria_present: false,
            ..Self::new("")
        }
    }

    /// `(task_name, video)` of every assessment so far.
    pub fn assessed(&self) -> Vec<(String, PathBuf)> {
        lock(&self.assessed).clone()
    }
}

impl VideoAssessor for ScriptedAssessor {
    fn check_ready(&self, task_name: &str) -> Result<()> {
        if self.criteria_present {
            Ok(())
        } else {
            Err(HarnessError::not_found(format!("criteria for {task_name}")).into())
        }
    }

    fn assess(&self, task_name: &str, video: &Path) -> Result<String> {
        self.check_ready(task_name)?;
        lock(&self.assessed).push((task_name.to_string(), video.to_path_buf()));
        Ok(self.reply.clone())
    }
}

/// Simulator with failure injection and shared counters.
///
/// Each step adds one `oak_log` and moves one block along x. Episodes
/// terminate after [`ScriptedSimulator::terminating_after`] steps when set.
#[derive(Default)]
pub struct ScriptedSimulator {
    terminate_after: Option<u32>,
    fail_launch: bool,
    fail_command: Option<String>,
    step_delay: Duration,
    no_recording: bool,
    commands: Arc<Mutex<Vec<String>>>,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminating_after(mut self, steps: u32) -> Self {
        self.terminate_after = Some(steps);
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Commands containing `needle` fail.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_command = Some(needle.into());
        self
    }

    /// Sleep inside every step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Never write episode videos.
    pub fn without_recording(mut self) -> Self {
        self.no_recording = true;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Simulator for ScriptedSimulator {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn SimulatorHandle>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            bail!("scripted launch failure");
        }
        fs::create_dir_all(&request.record_dir)?;
        Ok(Box::new(ScriptedHandle {
            record_dir: (!self.no_recording).then(|| request.record_dir.clone()),
            terminate_after: self.terminate_after,
            fail_command: self.fail_command.clone(),
            step_delay: self.step_delay,
            commands: Arc::clone(&self.commands),
            closes: Arc::clone(&self.closes),
            episode: None,
            steps: 0,
            closed: false,
        }))
    }
}

struct ScriptedHandle {
    record_dir: Option<PathBuf>,
    terminate_after: Option<u32>,
    fail_command: Option<String>,
    step_delay: Duration,
    commands: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    episode: Option<u32>,
    steps: u32,
    closed: bool,
}

impl ScriptedHandle {
    fn observation(&self) -> Observation {
        Observation {
            image: None,
            inventory: BTreeMap::from([("oak_log".to_string(), self.steps)]),
            position: Some(Position {
                x: f64::from(self.steps),
                ..Position::default()
            }),
        }
    }

    fn record_episode(&self) -> Result<()> {
        if let (Some(dir), Some(episode)) = (&self.record_dir, self.episode) {
            write_placeholder_video(&dir.join(format!("episode_{episode}.mp4")))?;
        }
        Ok(())
    }
}

impl SimulatorHandle for ScriptedHandle {
    fn execute_command(&mut self, command: &str) -> Result<()> {
        if self
            .fail_command
            .as_deref()
            .is_some_and(|needle| command.contains(needle))
        {
            bail!("scripted command failure: {command}");
        }
        lock(&self.commands).push(command.to_string());
        Ok(())
    }

    fn reset(&mut self) -> Result<(Observation, Info)> {
        if self.closed {
            bail!("handle closed");
        }
        self.record_episode()?;
        self.episode = Some(self.episode.map_or(0, |episode| episode + 1));
        self.steps = 0;
        Ok((self.observation(), Info::new()))
    }

    fn step(&mut self, _action: &Action) -> Result<StepOutcome> {
        if self.closed {
            bail!("handle closed");
        }
        if !self.step_delay.is_zero() {
            thread::sleep(self.step_delay);
        }
        self.steps += 1;
        Ok(StepOutcome {
            observation: self.observation(),
            reward: 1.0,
            terminated: self.terminate_after.is_some_and(|limit| self.steps >= limit),
            truncated: false,
            info: Info::new(),
        })
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.record_episode()?;
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
