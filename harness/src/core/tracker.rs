//! Performer-side view of the world between control steps.

use std::collections::BTreeMap;

use crate::core::observation::{Observation, Position};

const RECENT_ACTIONS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    pub inventory: BTreeMap<String, u32>,
    pub position: Option<Position>,
    completed: Vec<String>,
    history: Vec<String>,
}

impl StateTracker {
    /// Take inventory and position from an observation. Missing fields keep
    /// the last known value.
    pub fn update(&mut self, observation: &Observation) {
        if !observation.inventory.is_empty() {
            self.inventory = observation.inventory.clone();
        }
        if observation.position.is_some() {
            self.position = observation.position;
        }
    }

    /// Record a finished subtask once, keeping completion order.
    pub fn mark_complete(&mut self, subtask: &str) -> bool {
        if self.completed.iter().any(|done| done == subtask) {
            return false;
        }
        self.completed.push(subtask.to_string());
        true
    }

    pub fn record_action(&mut self, name: &str) {
        self.history.push(name.to_string());
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn recent_actions(&self) -> &[String] {
        let start = self.history.len().saturating_sub(RECENT_ACTIONS);
        &self.history[start..]
    }

    pub fn position_text(&self) -> String {
        match self.position {
            Some(p) => format!("x={:.1} y={:.1} z={:.1} yaw={:.0}", p.x, p.y, p.z, p.yaw),
            None => "Unknown".to_string(),
        }
    }

    /// Short text block for prompts.
    pub fn summary(&self) -> String {
        let recent = if self.history.is_empty() {
            "None".to_string()
        } else {
            self.recent_actions().join(", ")
        };
        format!(
            "Inventory: {:?}\nPosition: {}\nCompleted: {} subtasks\nRecent actions: {}",
            self.inventory,
            self.position_text(),
            self.completed.len(),
            recent
        )
    }
}
