//! Live simulator sessions keyed by agent id.
//!
//! The map lock is only held to look up, insert or remove an entry. Each
//! session sits behind its own mutex, so operations on one agent id are
//! serialized while different agent ids proceed in parallel.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::core::actions::Action;
use crate::core::observation::{Observation, StepOutcome};
use crate::core::task::{Difficulty, TaskSpec};
use crate::error::HarnessError;
use crate::io::simulator::{LaunchRequest, Simulator, SimulatorHandle, prepare, recorded_videos};

struct Session {
    agent_id: String,
    task: Arc<TaskSpec>,
    episode: u32,
    record_dir: PathBuf,
    handle: Box<dyn SimulatorHandle>,
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Public view of one live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub agent_id: String,
    pub task_name: String,
    pub difficulty: Difficulty,
    pub episode: u32,
}

/// Result of a successful `init`.
#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub agent_id: String,
    pub record_dir: PathBuf,
    pub observation: Observation,
}

/// Result of a successful `reset`.
#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub episode: u32,
    pub observation: Observation,
}

pub struct SessionRegistry {
    simulator: Arc<dyn Simulator>,
    recordings_dir: PathBuf,
    sessions: Mutex<HashMap<String, Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn session_not_found(agent_id: &str) -> anyhow::Error {
    HarnessError::SessionNotFound {
        agent_id: agent_id.to_string(),
    }
    .into()
}

impl SessionRegistry {
    pub fn new(simulator: Arc<dyn Simulator>, recordings_dir: PathBuf) -> Self {
        Self {
            simulator,
            recordings_dir,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session: launch a simulator recording into
    /// `{recordings_dir}/{agent_id}`, apply the task's init commands and reset.
    ///
    /// An id with a live session is rejected with `AlreadyActive`. A failed
    /// init leaves nothing registered.
    #[instrument(skip_all, fields(agent_id = agent_id.unwrap_or("<new>"), task = %task.name))]
    pub fn init(&self, agent_id: Option<&str>, task: Arc<TaskSpec>) -> Result<InitOutcome> {
        let agent_id = agent_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("agent_{}", Uuid::new_v4().simple()));

        let slot: Slot = Arc::new(Mutex::new(None));
        let mut guard = {
            let mut sessions = lock(&self.sessions);
            if sessions.contains_key(&agent_id) {
                return Err(HarnessError::AlreadyActive { agent_id }.into());
            }
            sessions.insert(agent_id.clone(), Arc::clone(&slot));
            lock(&slot)
        };

        let record_dir = self.recordings_dir.join(&agent_id);
        match self.open(&record_dir, &task) {
            Ok((handle, observation)) => {
                *guard = Some(Session {
                    agent_id: agent_id.clone(),
                    task,
                    episode: 0,
                    record_dir: record_dir.clone(),
                    handle,
                });
                info!(agent_id = %agent_id, record_dir = %record_dir.display(), "session started");
                Ok(InitOutcome {
                    agent_id,
                    record_dir,
                    observation,
                })
            }
            Err(err) => {
                drop(guard);
                self.remove_slot(&agent_id, &slot);
                Err(err.context(format!("init session {agent_id}")))
            }
        }
    }

    fn open(
        &self,
        record_dir: &Path,
        task: &TaskSpec,
    ) -> Result<(Box<dyn SimulatorHandle>, Observation)> {
        fs::create_dir_all(record_dir)
            .with_context(|| format!("create {}", record_dir.display()))?;
        let mut handle = self.simulator.launch(&LaunchRequest {
            record_dir: record_dir.to_path_buf(),
        })?;
        match prepare(handle.as_mut(), &task.init_commands) {
            Ok(observation) => Ok((handle, observation)),
            Err(err) => {
                if let Err(close_err) = handle.close() {
                    warn!(err = %close_err, "failed to close simulator after init failure");
                }
                Err(err)
            }
        }
    }

    fn slot(&self, agent_id: &str) -> Result<Slot> {
        lock(&self.sessions)
            .get(agent_id)
            .cloned()
            .ok_or_else(|| session_not_found(agent_id))
    }

    fn remove_slot(&self, agent_id: &str, slot: &Slot) {
        let mut sessions = lock(&self.sessions);
        if sessions
            .get(agent_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(agent_id);
        }
    }

    /// Advance the session's simulator by one action.
    pub fn step(&self, agent_id: &str, action: &Action) -> Result<StepOutcome> {
        let slot = self.slot(agent_id)?;
        let mut guard = lock(&slot);
        let session = guard.as_mut().ok_or_else(|| session_not_found(agent_id))?;
        session.handle.step(action)
    }

    /// Start the next episode. Only this agent's slot is locked.
    #[instrument(skip(self))]
    pub fn reset(&self, agent_id: &str) -> Result<ResetOutcome> {
        let slot = self.slot(agent_id)?;
        let mut guard = lock(&slot);
        let session = guard.as_mut().ok_or_else(|| session_not_found(agent_id))?;
        let (observation, _info) = session.handle.reset()?;
        session.episode += 1;
        info!(episode = session.episode, "episode reset");
        Ok(ResetOutcome {
            episode: session.episode,
            observation,
        })
    }

    /// Close the simulator and drop the session.
    ///
    /// Returns the recorded `.mp4` files followed by the record directory. A
    /// second close of the same id fails with `SessionNotFound`.
    #[instrument(skip(self))]
    pub fn close(&self, agent_id: &str) -> Result<Vec<PathBuf>> {
        let slot = self.slot(agent_id)?;
        let mut guard = lock(&slot);
        let mut session = guard.take().ok_or_else(|| session_not_found(agent_id))?;
        self.remove_slot(agent_id, &slot);
        drop(guard);

        session
            .handle
            .close()
            .with_context(|| format!("close simulator for {agent_id}"))?;
        let mut files = recorded_videos(&session.record_dir)?;
        info!(videos = files.len(), task = %session.task.name, "session closed");
        files.push(session.record_dir);
        Ok(files)
    }

    /// Live sessions, sorted by agent id.
    pub fn list(&self) -> Vec<SessionSummary> {
        let slots: Vec<Slot> = lock(&self.sessions).values().cloned().collect();
        let mut summaries: Vec<SessionSummary> = slots
            .iter()
            .filter_map(|slot| {
                let guard = lock(slot);
                guard.as_ref().map(|session| SessionSummary {
                    agent_id: session.agent_id.clone(),
                    task_name: session.task.name.clone(),
                    difficulty: session.task.difficulty,
                    episode: session.episode,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        summaries
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every live session, logging failures. Returns how many closed cleanly.
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        ids.iter()
            .filter(|agent_id| match self.close(agent_id) {
                Ok(_) => true,
                Err(err) => {
                    warn!(agent_id = %agent_id, err = %err, "failed to close session");
                    false
                }
            })
            .count()
    }
}
