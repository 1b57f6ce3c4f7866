//! Spawning and tearing down `agent-server` child processes.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Resolve the `agent-server` binary: an explicit override, else the file
/// next to the running executable.
pub fn server_binary(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    let exe = std::env::current_exe().context("locate current executable")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow!("executable {} has no parent dir", exe.display()))?;
    Ok(dir.join(format!("agent-server{}", std::env::consts::EXE_SUFFIX)))
}

/// How to start one agent role.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub binary: PathBuf,
    pub role: &'static str,
    pub host: String,
    pub port: u16,
    pub config: PathBuf,
}

impl ServerSpec {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(self.role)
            .arg("--host")
            .arg(&self.host)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--config")
            .arg(&self.config);
        command
    }
}

/// A running child, killed and reaped on drop.
pub struct AgentProcess {
    label: String,
    child: Option<Child>,
}

impl AgentProcess {
    /// Spawn `command`. With `log_path`, stdout and stderr go to that file;
    /// otherwise the child's stderr is shared with ours.
    pub fn spawn(label: &str, mut command: Command, log_path: Option<&Path>) -> Result<Self> {
        command.stdin(Stdio::null());
        match log_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create log dir {}", parent.display()))?;
                }
                let log = File::create(path)
                    .with_context(|| format!("create log {}", path.display()))?;
                let err_log = log.try_clone().context("clone log handle")?;
                command.stdout(Stdio::from(log)).stderr(Stdio::from(err_log));
            }
            None => {
                command.stdout(Stdio::null()).stderr(Stdio::inherit());
            }
        }
        let child = command
            .spawn()
            .with_context(|| format!("spawn {label} agent"))?;
        info!(label, pid = child.id(), "agent process started");
        Ok(Self {
            label: label.to_string(),
            child: Some(child),
        })
    }

    /// Fail if the child already exited (e.g. the port was taken).
    pub fn ensure_running(&mut self) -> Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Err(anyhow!("{} agent was stopped", self.label));
        };
        match child.try_wait().context("poll agent process")? {
            Some(status) => Err(anyhow!("{} agent exited early with {status}", self.label)),
            None => Ok(()),
        }
    }

    pub fn stop(mut self) -> Result<()> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait().context("poll agent process")?.is_some() {
            return Ok(());
        }
        child.kill().with_context(|| format!("kill {} agent", self.label))?;
        match child.wait_timeout(STOP_GRACE).context("wait for agent")? {
            Some(status) => debug!(label = %self.label, ?status, "agent process stopped"),
            None => warn!(label = %self.label, "agent did not exit after kill"),
        }
        Ok(())
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if let Err(err) = self.stop_inner() {
            warn!(label = %self.label, err = %err, "failed to stop agent process");
        }
    }
}
