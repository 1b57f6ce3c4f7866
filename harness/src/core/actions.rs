//! Simulator actions and the primitive vocabulary of the action-mapping fallback.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primitive action names offered to the completion service, with the
/// simulator control each one presses.
pub const PRIMITIVES: [(&str, &str); 9] = [
    ("move_forward", "forward"),
    ("move_back", "back"),
    ("turn_left", "left"),
    ("turn_right", "right"),
    ("jump", "jump"),
    ("attack", "attack"),
    ("use", "use"),
    ("sneak", "sneak"),
    ("sprint", "sprint"),
];

/// Sequence used when the mapper cannot get a usable answer.
pub fn exploration_fallback() -> Vec<String> {
    let mut actions = vec!["move_forward".to_string(); 5];
    actions.extend(vec!["turn_right".to_string(); 2]);
    actions
}

/// Sequence used when the reply is an object without an `actions` list.
fn missing_actions_default() -> Vec<String> {
    vec!["move_forward".to_string(); 10]
}

/// One simulator action: control name → value. Absent controls are released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Action(pub BTreeMap<String, Value>);

impl Action {
    pub fn noop() -> Self {
        Self::default()
    }

    /// Press the control behind a primitive name.
    pub fn from_primitive(name: &str) -> Option<Self> {
        PRIMITIVES
            .iter()
            .find(|(primitive, _)| *primitive == name)
            .map(|(_, control)| Self(BTreeMap::from([(control.to_string(), Value::from(1))])))
    }

    /// Whether `control` is pressed (non-zero / true).
    pub fn pressed(&self, control: &str) -> bool {
        match self.0.get(control) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_f64().is_some_and(|value| value != 0.0),
            _ => false,
        }
    }
}

/// Parse an action-mapping reply into known primitive names.
///
/// Accepts `{"actions": [...]}` or a bare list. An object without `actions`
/// yields ten `move_forward`; unknown names are dropped.
pub fn parse_action_reply(reply: &Value) -> Result<Vec<String>> {
    let list = match reply {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("actions") {
            Some(Value::Array(items)) => items,
            Some(other) => return Err(anyhow!("actions is not a list: {other}")),
            None => return Ok(missing_actions_default()),
        },
        other => return Err(anyhow!("unexpected action reply: {other}")),
    };
    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| PRIMITIVES.iter().any(|(primitive, _)| primitive == name))
        .map(str::to_string)
        .collect())
}
