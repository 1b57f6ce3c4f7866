//! One evaluation run, from task resolution to extracted scores.
//!
//! ```text
//! RESOLVING → WAITING_READY → REQUEST_SENT → AWAITING_RESPONSE
//!           → ARTIFACT_RECEIVED → SCORING → DONE
//! ```
//!
//! Any failure ends the run in `FAILED`; the error carries the stage it
//! happened in. Nothing is retried here.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::messages::{
    AssessmentReport, AssessmentRequest, ExecutionArtifact, TaskRequest, VideoRef,
};
use crate::core::scoring::{extract, overall};
use crate::error::{HarnessError, ProtocolError};
use crate::io::assessor::VideoAssessor;
use crate::io::config::HarnessConfig;
use crate::io::transport::AgentTransport;
use crate::readiness::wait_ready;
use crate::resolver::{ResolvedTask, TaskResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    WaitingReady,
    RequestSent,
    AwaitingResponse,
    ArtifactReceived,
    Scoring,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolving => "RESOLVING",
            Stage::WaitingReady => "WAITING_READY",
            Stage::RequestSent => "REQUEST_SENT",
            Stage::AwaitingResponse => "AWAITING_RESPONSE",
            Stage::ArtifactReceived => "ARTIFACT_RECEIVED",
            Stage::Scoring => "SCORING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that ended in `FAILED`, with the stage it failed in.
#[derive(Debug)]
pub struct RunFailure {
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl RunFailure {
    /// Typed failure class, if the cause carries one.
    pub fn harness_error(&self) -> Option<&HarnessError> {
        HarnessError::find(&self.source)
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.source.as_ref();
        Some(source)
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, RunFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> Result<T, RunFailure> {
        self.map_err(|source| RunFailure { stage, source })
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
    pub request_timeout: Duration,
    /// Inline videos are written to `{output_dir}/{task}/`.
    pub output_dir: PathBuf,
    pub metrics: Vec<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            ready_timeout: Duration::from_secs(config.timeouts.ready_secs),
            ready_interval: Duration::from_millis(config.timeouts.ready_poll_interval_ms),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            output_dir: config.paths.output_dir.clone(),
            metrics: config.scoring.metrics.clone(),
        }
    }
}

pub struct Orchestrator {
    resolver: Arc<TaskResolver>,
    transport: Arc<dyn AgentTransport>,
    assessor: Arc<dyn VideoAssessor>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<TaskResolver>,
        transport: Arc<dyn AgentTransport>,
        assessor: Arc<dyn VideoAssessor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            resolver,
            transport,
            assessor,
            settings,
        }
    }

    #[instrument(skip_all, fields(performer = %request.performer_url, task = request.task_name.as_deref().unwrap_or("<generated>")))]
    pub fn run(&self, request: &AssessmentRequest) -> Result<AssessmentReport, RunFailure> {
        let result = self.run_stages(request);
        match &result {
            Ok(report) => info!(
                stage = %Stage::Done,
                scores = report.scores.len(),
                overall = ?report.overall_score,
                "assessment finished"
            ),
            Err(failure) => warn!(
                stage = %Stage::Failed,
                failed_in = %failure.stage,
                err = %failure,
                "assessment failed"
            ),
        }
        result
    }

    fn run_stages(&self, request: &AssessmentRequest) -> Result<AssessmentReport, RunFailure> {
        debug!(stage = %Stage::Resolving, "stage");
        let resolved = self.resolve(request).at(Stage::Resolving)?;
        let task = Arc::clone(&resolved.spec);

        debug!(stage = %Stage::WaitingReady, "stage");
        wait_ready(
            self.transport.as_ref(),
            &request.performer_url,
            self.settings.ready_timeout,
            self.settings.ready_interval,
        )
        .at(Stage::WaitingReady)?;

        debug!(stage = %Stage::RequestSent, "stage");
        let message = TaskRequest::for_task(
            &task,
            resolved.config_path.as_deref(),
            request.max_steps,
        )
        .to_message()
        .context("encode task request")
        .at(Stage::RequestSent)?;

        debug!(stage = %Stage::AwaitingResponse, "stage");
        let parts = self
            .transport
            .send_message(&request.performer_url, &message, self.settings.request_timeout)
            .at(Stage::AwaitingResponse)?;
        let reply = single_part(parts).at(Stage::AwaitingResponse)?;

        debug!(stage = %Stage::ArtifactReceived, "stage");
        let artifact = ExecutionArtifact::from_reply(&reply)
            .map_err(anyhow::Error::from)
            .at(Stage::ArtifactReceived)?;
        info!(
            steps = artifact.steps_taken,
            completed = artifact.completed,
            "artifact received"
        );

        debug!(stage = %Stage::Scoring, "stage");
        let video = self
            .materialize_video(&task.name, &artifact)
            .at(Stage::Scoring)?;
        let feedback = self.assessor.assess(&task.name, &video).at(Stage::Scoring)?;
        let scores = extract(&feedback, &self.settings.metrics);
        let overall_score = overall(&scores);

        Ok(AssessmentReport {
            task_name: task.name.clone(),
            difficulty: task.difficulty,
            performer_url: request.performer_url.clone(),
            video_path: video.display().to_string(),
            steps_taken: artifact.steps_taken,
            task_completed: artifact.completed,
            scores,
            overall_score,
            feedback,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Resolve the task and make sure it can be scored before anything is sent.
    fn resolve(&self, request: &AssessmentRequest) -> Result<ResolvedTask> {
        let resolved = self.resolver.resolve(
            request.task_name.as_deref(),
            request.difficulty,
            request.task_type,
        )?;
        self.assessor.check_ready(&resolved.spec.name)?;
        Ok(resolved)
    }

    /// Path of the video to score; inline bytes are written out first.
    fn materialize_video(&self, task_name: &str, artifact: &ExecutionArtifact) -> Result<PathBuf> {
        match artifact.video_ref() {
            Some(VideoRef::Inline(encoded)) => {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .context("decode inline video")?;
                let dir = self.settings.output_dir.join(task_name);
                let path = dir.join(format!("episode_{}.mp4", Utc::now().timestamp_millis()));
                persist_video(&path, &bytes)?;
                info!(path = %path.display(), bytes = bytes.len(), "saved inline video");
                Ok(path)
            }
            Some(VideoRef::Path(path)) => Ok(path.to_path_buf()),
            None => Err(anyhow!("artifact carries neither video bytes nor a path")),
        }
    }
}

fn single_part(parts: Vec<String>) -> Result<String> {
    let count = parts.len();
    let mut parts = parts.into_iter();
    match (parts.next(), parts.next()) {
        (Some(only), None) => Ok(only),
        _ => Err(HarnessError::from(ProtocolError::UnexpectedPartCount { count }).into()),
    }
}

fn persist_video(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_names_the_stage() {
        let failure = RunFailure {
            stage: Stage::WaitingReady,
            source: HarnessError::AgentUnready {
                url: "http://localhost:9002".to_string(),
                waited_secs: 30,
            }
            .into(),
        };
        assert_eq!(
            failure.to_string(),
            "WAITING_READY: agent at http://localhost:9002 not ready after 30s"
        );
        assert!(matches!(
            failure.harness_error(),
            Some(HarnessError::AgentUnready { .. })
        ));
    }

    #[test]
    fn exactly_one_part_is_accepted() {
        assert_eq!(single_part(vec!["a".to_string()]).expect("one"), "a");
        for parts in [Vec::new(), vec!["a".to_string(), "b".to_string()]] {
            let count = parts.len();
            let err = single_part(parts).expect_err("wrong count");
            assert_eq!(
                HarnessError::find(&err),
                Some(&HarnessError::Protocol(ProtocolError::UnexpectedPartCount {
                    count
                }))
            );
        }
    }
}
