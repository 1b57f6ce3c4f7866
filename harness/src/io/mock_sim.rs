//! In-process stand-in simulator for running without a real environment.
//!
//! Episodes are deterministic: `/give` commands fill the inventory, movement
//! controls change the position, nothing ever terminates on its own, and each
//! finished episode leaves a placeholder MP4 in the record directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::actions::Action;
use crate::core::observation::{Info, Observation, Position, StepOutcome};
use crate::io::simulator::{LaunchRequest, Simulator, SimulatorHandle};

/// `ftyp` box of an empty MP4 file.
pub const PLACEHOLDER_MP4: &[u8] = &[
    0x00, 0x00, 0x00, 0x20, 0x66, 0x74, 0x79, 0x70, 0x69, 0x73, 0x6F, 0x6D, 0x00, 0x00, 0x02,
    0x00, 0x69, 0x73, 0x6F, 0x6D, 0x69, 0x73, 0x6F, 0x32, 0x61, 0x76, 0x63, 0x31, 0x6D, 0x70,
    0x34, 0x31,
];

/// Write a placeholder recording, creating the parent directory.
pub fn write_placeholder_video(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, PLACEHOLDER_MP4).with_context(|| format!("write {}", path.display()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockSimulator {
    /// Truncate episodes after this many steps (0 = never).
    pub horizon: u32,
}

impl Simulator for MockSimulator {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn SimulatorHandle>> {
        fs::create_dir_all(&request.record_dir)
            .with_context(|| format!("create {}", request.record_dir.display()))?;
        Ok(Box::new(MockHandle {
            record_dir: request.record_dir.clone(),
            horizon: self.horizon,
            pending_items: BTreeMap::new(),
            inventory: BTreeMap::new(),
            position: Position::default(),
            episode: None,
            steps: 0,
            closed: false,
        }))
    }
}

struct MockHandle {
    record_dir: PathBuf,
    horizon: u32,
    /// Items granted by commands, applied at the next reset.
    pending_items: BTreeMap<String, u32>,
    inventory: BTreeMap<String, u32>,
    position: Position,
    episode: Option<u32>,
    steps: u32,
    closed: bool,
}

impl MockHandle {
    fn observation(&self) -> Observation {
        Observation {
            image: None,
            inventory: self.inventory.clone(),
            position: Some(self.position),
        }
    }

    fn finish_episode(&mut self) -> Result<()> {
        if let Some(episode) = self.episode {
            let path = self.record_dir.join(format!("episode_{episode}.mp4"));
            write_placeholder_video(&path)?;
            debug!(path = %path.display(), steps = self.steps, "mock episode recorded");
        }
        Ok(())
    }
}

impl SimulatorHandle for MockHandle {
    fn execute_command(&mut self, command: &str) -> Result<()> {
        if self.closed {
            bail!("simulator is closed");
        }
        let mut words = command.split_whitespace();
        if words.next() == Some("/give") {
            let _target = words.next();
            if let Some(item) = words.next() {
                let count = words.next().and_then(|n| n.parse().ok()).unwrap_or(1);
                let item = item.trim_start_matches("minecraft:").to_string();
                *self.pending_items.entry(item).or_insert(0) += count;
            }
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(Observation, Info)> {
        if self.closed {
            bail!("simulator is closed");
        }
        self.finish_episode()?;
        self.episode = Some(self.episode.map_or(0, |episode| episode + 1));
        self.steps = 0;
        self.position = Position::default();
        self.inventory = self.pending_items.clone();
        Ok((self.observation(), Info::new()))
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        if self.closed {
            bail!("simulator is closed");
        }
        if self.episode.is_none() {
            bail!("step before reset");
        }
        self.steps += 1;
        let yaw = self.position.yaw.to_radians();
        if action.pressed("forward") {
            self.position.x += yaw.cos();
            self.position.z += yaw.sin();
        }
        if action.pressed("back") {
            self.position.x -= yaw.cos();
            self.position.z -= yaw.sin();
        }
        if action.pressed("left") {
            self.position.yaw -= 15.0;
        }
        if action.pressed("right") {
            self.position.yaw += 15.0;
        }
        if action.pressed("jump") {
            self.position.y += 1.0;
        }
        let truncated = self.horizon > 0 && self.steps >= self.horizon;
        Ok(StepOutcome {
            observation: self.observation(),
            reward: 0.0,
            terminated: false,
            truncated,
            info: Info::new(),
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.finish_episode()?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulator::{prepare, recorded_videos};

    #[test]
    fn give_commands_fill_inventory_after_reset() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sim = MockSimulator::default();
        let mut handle = sim
            .launch(&LaunchRequest {
                record_dir: temp.path().join("rec"),
            })
            .expect("launch");
        let commands = vec![
            "/give @s minecraft:oak_log 3".to_string(),
            "/give @s minecraft:iron_axe".to_string(),
            "/time set day".to_string(),
        ];
        let observation = prepare(handle.as_mut(), &commands).expect("prepare");
        assert_eq!(observation.inventory["oak_log"], 3);
        assert_eq!(observation.inventory["iron_axe"], 1);
    }

    #[test]
    fn horizon_truncates_and_close_records_each_episode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let record_dir = temp.path().join("rec");
        let mut handle = MockSimulator { horizon: 2 }
            .launch(&LaunchRequest {
                record_dir: record_dir.clone(),
            })
            .expect("launch");
        handle.reset().expect("reset");
        let forward = Action::from_primitive("move_forward").expect("primitive");
        assert!(!handle.step(&forward).expect("step").truncated);
        let second = handle.step(&forward).expect("step");
        assert!(second.truncated);
        assert_eq!(second.observation.position.map(|p| p.x.round()), Some(2.0));

        handle.reset().expect("second episode");
        handle.close().expect("close");
        let videos = recorded_videos(&record_dir).expect("list");
        let names: Vec<String> = videos
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["episode_0.mp4", "episode_1.mp4"]);
    }

    #[test]
    fn step_after_close_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut handle = MockSimulator::default()
            .launch(&LaunchRequest {
                record_dir: temp.path().to_path_buf(),
            })
            .expect("launch");
        handle.reset().expect("reset");
        handle.close().expect("close");
        assert!(handle.step(&Action::noop()).is_err());
    }
}
