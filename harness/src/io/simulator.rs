//! Simulator boundary.
//!
//! A [`Simulator`] launches handles; a [`SimulatorHandle`] is one running
//! environment that records its episodes as video files into the directory it
//! was launched with. The handle exposes exactly the capabilities the harness
//! uses, so adapters implement them once instead of being probed at runtime.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::actions::Action;
use crate::core::observation::{Info, Observation, StepOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Directory that receives recorded videos.
    pub record_dir: PathBuf,
}

pub trait Simulator: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn SimulatorHandle>>;
}

pub trait SimulatorHandle: Send {
    /// Run one initialization command (e.g. `/give @s minecraft:iron_axe`).
    fn execute_command(&mut self, command: &str) -> Result<()>;
    fn reset(&mut self) -> Result<(Observation, Info)>;
    fn step(&mut self, action: &Action) -> Result<StepOutcome>;
    /// Stop the environment and flush recordings.
    fn close(&mut self) -> Result<()>;
}

/// Apply init commands in order, then reset.
pub fn prepare(handle: &mut dyn SimulatorHandle, commands: &[String]) -> Result<Observation> {
    for (index, command) in commands.iter().enumerate() {
        handle
            .execute_command(command)
            .with_context(|| format!("init command {} ({command})", index + 1))?;
    }
    let (observation, _info) = handle.reset().context("initial reset")?;
    Ok(observation)
}

/// Recorded `.mp4` files in `dir`, sorted by name.
pub fn recorded_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut videos = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry.context("read entry")?.path();
        if path.extension().is_some_and(|ext| ext == "mp4") {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}
