//! Video scoring service: criteria text plus sampled frames in, free-text
//! assessment out. Score extraction happens in [`crate::core::scoring`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use crate::error::HarnessError;
use crate::io::completion::{ChatMessage, CompletionRequest, CompletionService};
use crate::io::frames::FrameSampler;
use crate::io::prompt::PromptEngine;

pub trait VideoAssessor: Send + Sync {
    /// Fails with `NotFound` when the task has no grading criteria.
    fn check_ready(&self, task_name: &str) -> Result<()>;

    fn assess(&self, task_name: &str, video: &Path) -> Result<String>;
}

/// `{criteria_dir}/{task name with spaces as underscores}.txt`
pub fn criteria_path(criteria_dir: &Path, task_name: &str) -> PathBuf {
    criteria_dir.join(format!("{}.txt", task_name.replace(' ', "_")))
}

/// Vision-language-model judge.
pub struct VlmAssessor {
    completion: Arc<dyn CompletionService>,
    sampler: Arc<dyn FrameSampler>,
    prompts: PromptEngine,
    criteria_dir: PathBuf,
    metrics: Vec<String>,
}

impl VlmAssessor {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        sampler: Arc<dyn FrameSampler>,
        criteria_dir: PathBuf,
        metrics: Vec<String>,
    ) -> Self {
        Self {
            completion,
            sampler,
            prompts: PromptEngine::new(),
            criteria_dir,
            metrics,
        }
    }

    fn read_criteria(&self, task_name: &str) -> Result<String> {
        let path = criteria_path(&self.criteria_dir, task_name);
        if !path.is_file() {
            return Err(HarnessError::not_found(format!("criteria file {}", path.display())).into());
        }
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

impl VideoAssessor for VlmAssessor {
    fn check_ready(&self, task_name: &str) -> Result<()> {
        let path = criteria_path(&self.criteria_dir, task_name);
        if path.is_file() {
            Ok(())
        } else {
            Err(HarnessError::not_found(format!("criteria file {}", path.display())).into())
        }
    }

    #[instrument(skip_all, fields(task = %task_name, video = %video.display()))]
    fn assess(&self, task_name: &str, video: &Path) -> Result<String> {
        let criteria = self.read_criteria(task_name)?;
        let frames = self.sampler.sample(video)?;
        if frames.is_empty() {
            bail!("no frames extracted from {}", video.display());
        }
        info!(frames = frames.len(), "scoring video");

        let prompts = self.prompts.assessment(task_name, &criteria, &self.metrics)?;
        let request = CompletionRequest::new(vec![
            ChatMessage::system(prompts.system),
            ChatMessage::user(prompts.user),
            ChatMessage::user_images(frames),
        ]);
        self.completion
            .complete(&request)
            .context("score video with completion service")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::completion::ContentPart;
    use crate::test_support::ScriptedCompletion;

    struct FixedFrames(Vec<String>);

    impl FrameSampler for FixedFrames {
        fn sample(&self, _video: &Path) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn assessor(
        dir: &Path,
        completion: Arc<ScriptedCompletion>,
        frames: Vec<String>,
    ) -> VlmAssessor {
        VlmAssessor::new(
            completion,
            Arc::new(FixedFrames(frames)),
            dir.to_path_buf(),
            vec!["Task Progress".to_string()],
        )
    }

    #[test]
    fn missing_criteria_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let judge = assessor(
            temp.path(),
            Arc::new(ScriptedCompletion::new()),
            vec!["QUJD".to_string()],
        );
        let err = judge.check_ready("collect wood").expect_err("no criteria");
        assert!(matches!(
            HarnessError::find(&err),
            Some(HarnessError::NotFound { .. })
        ));
    }

    #[test]
    fn sends_criteria_then_frames() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("collect_wood.txt"), "Reward chopping.").expect("write");
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_reply("- Task Progress: 8");
        let judge = assessor(temp.path(), completion.clone(), vec!["QUJD".to_string()]);

        judge.check_ready("collect wood").expect("criteria present");
        let text = judge
            .assess("collect wood", &temp.path().join("episode_0.mp4"))
            .expect("assess");
        assert_eq!(text, "- Task Progress: 8");

        let requests = completion.requests();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 3);
        assert!(messages[1].text().contains("Reward chopping."));
        assert_eq!(
            messages[2].parts,
            vec![ContentPart::JpegBase64("QUJD".to_string())]
        );
    }

    #[test]
    fn empty_frame_list_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("mine.txt"), "criteria").expect("write");
        let judge = assessor(temp.path(), Arc::new(ScriptedCompletion::new()), Vec::new());
        assert!(judge.assess("mine", &temp.path().join("v.mp4")).is_err());
    }
}
