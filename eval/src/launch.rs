//! One assessment round: start both agents, ask the evaluator, tear down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use harness::core::messages::{AssessmentReport, AssessmentRequest};
use harness::core::task::{Difficulty, TaskType};
use harness::io::config::HarnessConfig;
use harness::io::transport::{AgentTransport, HttpTransport};
use harness::readiness::wait_ready;
use tracing::{debug, info, instrument};

use crate::agents::{AgentProcess, ServerSpec};

/// What to assess.
#[derive(Debug, Clone)]
pub struct TaskSelection {
    pub task_name: Option<String>,
    pub difficulty: Difficulty,
    pub max_steps: u32,
    pub task_type: TaskType,
}

#[derive(Debug, Clone)]
pub struct Launcher {
    pub evaluator: ServerSpec,
    pub performer: ServerSpec,
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
    pub request_timeout: Duration,
}

impl Launcher {
    pub fn new(
        binary: PathBuf,
        host: &str,
        ports: (u16, u16),
        config_path: &Path,
        config: &HarnessConfig,
    ) -> Self {
        let spec = |role: &'static str, port: u16| ServerSpec {
            binary: binary.clone(),
            role,
            host: host.to_string(),
            port,
            config: config_path.to_path_buf(),
        };
        Self {
            evaluator: spec("evaluator", ports.0),
            performer: spec("performer", ports.1),
            ready_timeout: Duration::from_secs(config.timeouts.ready_secs),
            ready_interval: Duration::from_millis(config.timeouts.ready_poll_interval_ms),
            request_timeout: Duration::from_secs(config.timeouts.batch_request_secs),
        }
    }

    /// Run one assessment with fresh agent processes.
    ///
    /// With `log_dir`, each agent's output goes to `{log_prefix}.{role}.log`
    /// in that directory. Both children are stopped before this returns.
    #[instrument(skip_all, fields(task = ?selection.task_name, difficulty = %selection.difficulty))]
    pub fn assess(
        &self,
        selection: &TaskSelection,
        log_dir: Option<&Path>,
        log_prefix: &str,
    ) -> Result<AssessmentReport> {
        let log = |role: &str| log_dir.map(|dir| dir.join(format!("{log_prefix}.{role}.log")));

        let mut evaluator = AgentProcess::spawn(
            "evaluator",
            self.evaluator.command(),
            log("evaluator").as_deref(),
        )?;
        let mut performer = AgentProcess::spawn(
            "performer",
            self.performer.command(),
            log("performer").as_deref(),
        )?;

        let transport = HttpTransport::new()?;
        for (process, spec) in [
            (&mut evaluator, &self.evaluator),
            (&mut performer, &self.performer),
        ] {
            wait_ready(
                &transport,
                &spec.url(),
                self.ready_timeout,
                self.ready_interval,
            )
            .with_context(|| format!("wait for {} agent", spec.role))?;
            process.ensure_running()?;
        }
        info!("both agents ready");

        let report = request_assessment(
            &transport,
            &self.evaluator.url(),
            &self.performer.url(),
            selection,
            self.request_timeout,
        );

        performer.stop()?;
        evaluator.stop()?;
        report
    }
}

/// Ask the evaluator at `evaluator_url` to assess the performer.
pub fn request_assessment(
    transport: &dyn AgentTransport,
    evaluator_url: &str,
    performer_url: &str,
    selection: &TaskSelection,
    timeout: Duration,
) -> Result<AssessmentReport> {
    let request = AssessmentRequest {
        performer_url: performer_url.to_string(),
        task_name: selection.task_name.clone(),
        difficulty: selection.difficulty,
        max_steps: selection.max_steps,
        task_type: selection.task_type,
    };
    debug!(evaluator_url, "sending assessment request");
    let parts = transport
        .send_message(evaluator_url, &request.to_message(), timeout)
        .context("assessment request")?;
    let reply = parts.join("\n");
    AssessmentReport::from_reply(&reply).context("parse assessment reply")
}
