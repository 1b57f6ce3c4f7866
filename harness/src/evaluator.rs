//! Evaluator agent: turns an assessment request into a scored report.

use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::core::messages::AssessmentRequest;
use crate::error::HarnessError;
use crate::orchestrator::Orchestrator;

pub struct EvaluatorAgent {
    orchestrator: Arc<Orchestrator>,
}

impl EvaluatorAgent {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Answer an assessment request with an `<assessment_result>` reply.
    ///
    /// Orchestrator failures come back as [`crate::orchestrator::RunFailure`]
    /// so callers can see the stage that failed.
    #[instrument(skip_all)]
    pub fn handle(&self, text: &str) -> Result<String> {
        let request = AssessmentRequest::from_message(text)?;
        let report = self.orchestrator.run(&request)?;
        Ok(report.to_reply()?)
    }

    pub fn cancel(&self) -> Result<()> {
        Err(HarnessError::NotSupported {
            operation: "tasks/cancel".to_string(),
        }
        .into())
    }
}
