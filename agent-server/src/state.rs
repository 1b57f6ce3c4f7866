//! Shared application state for the agent server.
//!
//! Everything here wraps blocking harness types. Build it inside
//! `spawn_blocking`: the HTTP clients it owns run their own runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::ValueEnum;
use harness::evaluator::EvaluatorAgent;
use harness::io::assessor::{VideoAssessor, VlmAssessor};
use harness::io::completion::{CompletionService, OpenAiCompletion};
use harness::io::config::HarnessConfig;
use harness::io::frames::FfmpegFrameSampler;
use harness::io::mock_sim::MockSimulator;
use harness::io::simulator::Simulator;
use harness::io::task_store::GeneratedTaskStore;
use harness::io::transport::{AgentCard, AgentTransport, HttpTransport};
use harness::orchestrator::{Orchestrator, OrchestratorSettings};
use harness::performer::{PerformerAgent, PerformerSettings};
use harness::registry::SessionRegistry;
use harness::resolver::TaskResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Evaluator,
    Performer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Evaluator => "evaluator",
            Role::Performer => "performer",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Role::Evaluator => 9001,
            Role::Performer => 9002,
        }
    }
}

/// The agent behind `message/send`.
#[derive(Clone)]
pub enum Agent {
    Evaluator(Arc<EvaluatorAgent>),
    Performer(Arc<PerformerAgent>),
}

impl Agent {
    pub fn handle(&self, text: &str) -> Result<String> {
        match self {
            Agent::Evaluator(agent) => agent.handle(text),
            Agent::Performer(agent) => agent.handle(text),
        }
    }

    pub fn cancel(&self) -> Result<()> {
        match self {
            Agent::Evaluator(agent) => agent.cancel(),
            Agent::Performer(agent) => agent.cancel(),
        }
    }
}

/// Evaluator-only collaborators behind the `/a2a` API.
pub struct EvaluatorServices {
    pub resolver: Arc<TaskResolver>,
    pub registry: Arc<SessionRegistry>,
    pub assessor: Arc<dyn VideoAssessor>,
    pub metrics: Vec<String>,
}

/// Remote collaborators of the evaluator role.
pub struct EvaluatorParts {
    pub completion: Arc<dyn CompletionService>,
    pub transport: Arc<dyn AgentTransport>,
    pub assessor: Arc<dyn VideoAssessor>,
    pub simulator: Arc<dyn Simulator>,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub role: Role,
    pub card: Arc<AgentCard>,
    pub agent: Agent,
    /// Present for the evaluator role only.
    pub services: Option<Arc<EvaluatorServices>>,
}

impl AppState {
    /// Wire a role to its real clients.
    pub fn build(role: Role, card: AgentCard, config: &HarnessConfig) -> Result<Self> {
        let completion: Arc<dyn CompletionService> = Arc::new(OpenAiCompletion::from_config(
            &config.llm,
            Duration::from_secs(config.timeouts.completion_secs),
        )?);
        let simulator: Arc<dyn Simulator> = Arc::new(MockSimulator {
            horizon: config.mock.horizon,
        });
        match role {
            Role::Evaluator => {
                let sampler = Arc::new(FfmpegFrameSampler::new(Duration::from_secs(
                    config.timeouts.frame_extract_secs,
                )));
                let assessor = Arc::new(VlmAssessor::new(
                    Arc::clone(&completion),
                    sampler,
                    config.paths.criteria_dir.clone(),
                    config.scoring.metrics.clone(),
                ));
                let parts = EvaluatorParts {
                    completion,
                    transport: Arc::new(HttpTransport::new()?),
                    assessor,
                    simulator,
                };
                Ok(Self::evaluator(card, parts, config))
            }
            Role::Performer => Ok(Self::performer(card, simulator, completion, config)),
        }
    }

    pub fn evaluator(card: AgentCard, parts: EvaluatorParts, config: &HarnessConfig) -> Self {
        let resolver = Arc::new(TaskResolver::new(
            config,
            parts.completion,
            GeneratedTaskStore::new(),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&resolver),
            parts.transport,
            Arc::clone(&parts.assessor),
            OrchestratorSettings::from_config(config),
        );
        let registry = Arc::new(SessionRegistry::new(
            parts.simulator,
            config.paths.recordings_dir.clone(),
        ));
        Self {
            role: Role::Evaluator,
            card: Arc::new(card),
            agent: Agent::Evaluator(Arc::new(EvaluatorAgent::new(Arc::new(orchestrator)))),
            services: Some(Arc::new(EvaluatorServices {
                resolver,
                registry,
                assessor: parts.assessor,
                metrics: config.scoring.metrics.clone(),
            })),
        }
    }

    pub fn performer(
        card: AgentCard,
        simulator: Arc<dyn Simulator>,
        completion: Arc<dyn CompletionService>,
        config: &HarnessConfig,
    ) -> Self {
        let agent = PerformerAgent::new(
            simulator,
            completion,
            PerformerSettings::from_config(config),
        );
        Self {
            role: Role::Performer,
            card: Arc::new(card),
            agent: Agent::Performer(Arc::new(agent)),
            services: None,
        }
    }

    /// Close every live session. Returns how many closed cleanly.
    pub fn shutdown(&self) -> usize {
        self.services
            .as_ref()
            .map_or(0, |services| services.registry.close_all())
    }
}
