//! Compiled-in agent cards.

use anyhow::{Context, Result};
use harness::io::transport::{AgentCard, AgentSkill};
use serde::Deserialize;

use crate::state::Role;

const EVALUATOR_CARD: &str = include_str!("../cards/evaluator.toml");
const PERFORMER_CARD: &str = include_str!("../cards/performer.toml");

#[derive(Debug, Deserialize)]
struct CardFile {
    name: String,
    description: String,
    version: String,
    #[serde(default)]
    skills: Vec<AgentSkill>,
}

/// The card a role serves, advertised at `url`.
pub fn load_card(role: Role, url: &str) -> Result<AgentCard> {
    let source = match role {
        Role::Evaluator => EVALUATOR_CARD,
        Role::Performer => PERFORMER_CARD,
    };
    let file: CardFile =
        toml::from_str(source).with_context(|| format!("parse {} card", role.as_str()))?;
    Ok(AgentCard {
        name: file.name,
        description: file.description,
        url: url.to_string(),
        version: file.version,
        default_input_modes: vec!["text/plain".to_string()],
        default_output_modes: vec!["text/plain".to_string()],
        skills: file.skills,
    })
}

/// `AGENT_URL` when set, else the bind address.
pub fn public_url(override_url: Option<String>, host: &str, port: u16) -> String {
    override_url
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| format!("http://{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_cards_parse() {
        let evaluator = load_card(Role::Evaluator, "http://127.0.0.1:9001").expect("evaluator");
        assert_eq!(evaluator.url, "http://127.0.0.1:9001");
        assert_eq!(evaluator.skills[0].id, "task_assessment");

        let performer = load_card(Role::Performer, "http://127.0.0.1:9002").expect("performer");
        assert_eq!(performer.skills[0].name, "Minecraft Task Execution");
    }

    #[test]
    fn agent_url_overrides_bind_address() {
        assert_eq!(
            public_url(Some("https://agents.example.org/performer/".to_string()), "0.0.0.0", 9002),
            "https://agents.example.org/performer"
        );
        assert_eq!(public_url(Some("  ".to_string()), "localhost", 9002), "http://localhost:9002");
        assert_eq!(public_url(None, "localhost", 9001), "http://localhost:9001");
    }
}
