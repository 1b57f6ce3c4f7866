//! Video frame sampling for the scoring model.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::io::process::run_with_timeout;

const DENSE_STRIDE: usize = 25;
const SPARSE_STRIDE: usize = 70;
const MAX_DENSE_FRAMES: usize = 60;

/// Produces base64 JPEG frames from a recorded video.
pub trait FrameSampler: Send + Sync {
    fn sample(&self, video: &Path) -> Result<Vec<String>>;
}

/// Every 25th frame, or every 70th when that would still exceed 60 frames.
pub fn sample_frames<T>(frames: Vec<T>) -> Vec<T> {
    let dense = frames.len().div_ceil(DENSE_STRIDE);
    let stride = if dense > MAX_DENSE_FRAMES {
        SPARSE_STRIDE
    } else {
        DENSE_STRIDE
    };
    frames.into_iter().step_by(stride).collect()
}

/// Extracts frames with the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSampler {
    pub binary: PathBuf,
    pub timeout: Duration,
}

impl FfmpegFrameSampler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            timeout,
        }
    }

    fn extract_all(&self, video: &Path, scratch: &Path) -> Result<Vec<PathBuf>> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-v", "error", "-i"])
            .arg(video)
            .args(["-q:v", "3"])
            .arg(scratch.join("frame_%06d.jpg"));
        let output = run_with_timeout(cmd, self.timeout, 64 * 1024)
            .with_context(|| format!("run {}", self.binary.display()))?;
        if output.timed_out {
            bail!("frame extraction timed out after {}s", self.timeout.as_secs());
        }
        if !output.status.success() {
            bail!("frame extraction failed: {}", output.stderr_tail(5));
        }
        let mut frames: Vec<PathBuf> = fs::read_dir(scratch)
            .with_context(|| format!("read {}", scratch.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "jpg"))
            .collect();
        frames.sort();
        Ok(frames)
    }
}

impl FrameSampler for FfmpegFrameSampler {
    #[instrument(skip_all, fields(video = %video.display()))]
    fn sample(&self, video: &Path) -> Result<Vec<String>> {
        if !video.is_file() {
            bail!("video {} does not exist", video.display());
        }
        let parent = video.parent().unwrap_or_else(|| Path::new("."));
        let scratch = parent.join(format!(".frames_{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&scratch).with_context(|| format!("create {}", scratch.display()))?;

        let result = self.extract_all(video, &scratch).and_then(|frames| {
            let total = frames.len();
            let selected = sample_frames(frames);
            debug!(total, selected = selected.len(), "frames sampled");
            selected
                .iter()
                .map(|path| {
                    fs::read(path)
                        .map(|bytes| STANDARD.encode(bytes))
                        .with_context(|| format!("read {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()
        });

        if let Err(err) = fs::remove_dir_all(&scratch) {
            warn!(err = %err, dir = %scratch.display(), "failed to remove frame scratch dir");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_videos_keep_every_25th_frame() {
        let frames: Vec<usize> = (0..100).collect();
        assert_eq!(sample_frames(frames), vec![0, 25, 50, 75]);
    }

    #[test]
    fn long_videos_switch_to_every_70th_frame() {
        let at_limit: Vec<usize> = (0..1500).collect();
        assert_eq!(sample_frames(at_limit).len(), 60);

        let over: Vec<usize> = (0..1526).collect();
        let sampled = sample_frames(over);
        assert_eq!(sampled[1], 70);
        assert_eq!(sampled.len(), 22);
    }

    #[test]
    fn missing_video_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sampler = FfmpegFrameSampler::new(Duration::from_secs(1));
        assert!(sampler.sample(&temp.path().join("none.mp4")).is_err());
    }
}
