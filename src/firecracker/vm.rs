use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{LaunchError, WaitError};

/// Where the hypervisor's stdout/stderr end up
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Both streams go to our stderr, stdin is shared
    #[default]
    Inherit,
    /// Lines are captured and re-emitted through tracing
    Log,
}

/// A hypervisor process that serves its control API on a Unix socket.
#[async_trait::async_trait]
pub trait Hypervisor: Send {
    /// Launch the process, telling it to bind its API to `api_socket`.
    async fn start(&mut self, api_socket: &Path) -> Result<(), LaunchError>;

    /// Block until the process exits. A non-zero exit is an error.
    async fn wait(&mut self) -> Result<ExitStatus, WaitError>;

    /// Kill the process and reap it. No-op if it is not running.
    async fn kill(&mut self) -> Result<(), WaitError>;
}

/// Supervises a Firecracker child process.
pub struct FirecrackerProcess {
    firecracker_bin: PathBuf,
    output: OutputMode,
    process: Option<Child>,
}

impl FirecrackerProcess {
    pub fn new(firecracker_bin: PathBuf, output: OutputMode) -> Self {
        Self {
            firecracker_bin,
            output,
            process: None,
        }
    }

    /// PID of the running child, if any
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    fn forward_output(child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "firecracker", "{}", strip_firecracker_prefix(&line));
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "firecracker", "{}", strip_firecracker_prefix(&line));
                }
            });
        }
    }
}

#[async_trait::async_trait]
impl Hypervisor for FirecrackerProcess {
    async fn start(&mut self, api_socket: &Path) -> Result<(), LaunchError> {
        if self.process.is_some() {
            return Err(LaunchError::AlreadyStarted);
        }

        info!(target: "vm", bin = %self.firecracker_bin.display(), api_socket = %api_socket.display(), "starting Firecracker process");

        // Stale socket from an earlier run would make the readiness check lie
        let _ = std::fs::remove_file(api_socket);

        let mut cmd = Command::new(&self.firecracker_bin);
        cmd.arg("--api-sock").arg(api_socket);
        cmd.kill_on_drop(true);

        match self.output {
            OutputMode::Inherit => {
                cmd.stdin(Stdio::inherit());
                cmd.stdout(std::io::stderr());
                cmd.stderr(Stdio::inherit());
            }
            OutputMode::Log => {
                cmd.stdin(Stdio::null());
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::piped());
            }
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            bin: self.firecracker_bin.clone(),
            source,
        })?;

        if self.output == OutputMode::Log {
            Self::forward_output(&mut child);
        }

        info!(target: "vm", pid = ?child.id(), "Firecracker process started");
        self.process = Some(child);
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus, WaitError> {
        // Child stays in place until it is reaped, so a cancelled wait can still be killed
        let process = self.process.as_mut().ok_or(WaitError::NotRunning)?;
        let status = process.wait().await.map_err(WaitError::Io)?;
        self.process = None;
        info!(target: "vm", %status, "Firecracker process exited");
        if !status.success() {
            return Err(WaitError::Exit(status));
        }
        Ok(status)
    }

    async fn kill(&mut self) -> Result<(), WaitError> {
        if let Some(mut process) = self.process.take() {
            info!(target: "vm", pid = ?process.id(), "killing Firecracker process");
            process.kill().await.map_err(WaitError::Io)?;
        }
        Ok(())
    }
}

/// Strip Firecracker's timestamp and instance prefix from a log line.
///
/// `2025-11-15T17:18:55.027478889 [anonymous-instance:main] message` becomes
/// `message`.
fn strip_firecracker_prefix(line: &str) -> &str {
    let mut result = line;

    if let Some(pos) = result.find(' ') {
        if result.starts_with("20") && result.chars().nth(4) == Some('-') {
            result = &result[pos + 1..];
        }
    }

    if result.starts_with('[') {
        if let Some(end_pos) = result.find("] ") {
            result = &result[end_pos + 2..];
        }
    }

    result
}
