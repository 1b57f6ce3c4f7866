//! What the simulator reports back after a reset or a step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    /// Encoded frame bytes, when the simulator renders one.
    pub image: Option<Vec<u8>>,
    pub inventory: BTreeMap<String, u32>,
    pub position: Option<Position>,
}

/// Free-form side channel returned alongside observations.
pub type Info = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}
