//! Boot sequence for a single VM.
//!
//! Launch Firecracker, wait for its API socket, configure boot source, drive
//! and vsock, bring up the frame server, start the instance, then wait for
//! the process to exit. Each step only runs if the previous one succeeded;
//! the first failure aborts the run and kills the hypervisor.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BootConfig;
use crate::error::{BootError, ListenError, WaitError};
use crate::firecracker::api::InstanceAction;
use crate::firecracker::{FirecrackerClient, Hypervisor};
use crate::paths::{vsock_listener_path, RunDir};
use crate::readiness::{wait_for_path, Readiness};
use crate::vsock::{FrameServerHandle, VsockFrameServer};

/// Where a run has got to. Stages are only ever entered in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    NotStarted,
    ProcessLaunched,
    ControlSocketReady,
    BootSourceSet,
    DriveSet,
    SideChannelSet,
    FrameServerListening,
    InstanceStartSent,
    Running,
    Exited,
}

impl BootStage {
    /// The operation that leads into this stage, for diagnostics
    pub fn action(&self) -> &'static str {
        match self {
            BootStage::NotStarted => "preparing run",
            BootStage::ProcessLaunched => "launching hypervisor",
            BootStage::ControlSocketReady => "waiting for control socket",
            BootStage::BootSourceSet => "setting boot source",
            BootStage::DriveSet => "attaching drive",
            BootStage::SideChannelSet => "attaching vsock device",
            BootStage::FrameServerListening => "starting frame server",
            BootStage::InstanceStartSent => "starting instance",
            BootStage::Running => "running",
            BootStage::Exited => "awaiting hypervisor exit",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStage::NotStarted => "not-started",
            BootStage::ProcessLaunched => "process-launched",
            BootStage::ControlSocketReady => "control-socket-ready",
            BootStage::BootSourceSet => "boot-source-set",
            BootStage::DriveSet => "drive-set",
            BootStage::SideChannelSet => "side-channel-set",
            BootStage::FrameServerListening => "frame-server-listening",
            BootStage::InstanceStartSent => "instance-start-sent",
            BootStage::Running => "running",
            BootStage::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// How the wait for the running VM ended
enum Outcome {
    Exited(Result<ExitStatus, WaitError>),
    FrameServerFailed(ListenError),
    Interrupted,
}

/// Drives one VM from launch to exit.
pub struct Bootstrapper<H> {
    config: BootConfig,
    hypervisor: H,
    stage: BootStage,
}

impl<H: Hypervisor> Bootstrapper<H> {
    pub fn new(config: BootConfig, hypervisor: H) -> Self {
        Self {
            config,
            hypervisor,
            stage: BootStage::NotStarted,
        }
    }

    fn advance(&mut self, next: BootStage) {
        info!(target: "boot", from = %self.stage, to = %next, "stage");
        self.stage = next;
    }

    /// Run the VM until the hypervisor exits.
    ///
    /// `shutdown` interrupts the run at any point: the hypervisor is killed
    /// and `BootError::Interrupted` returned. The run directory and the frame
    /// server are torn down on every path out of this function.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ExitStatus, BootError> {
        let run_dir = RunDir::create().map_err(BootError::RunDir)?;
        info!(target: "boot", dir = %run_dir.path().display(), "created run directory");

        self.hypervisor.start(&run_dir.api_socket()).await?;
        self.advance(BootStage::ProcessLaunched);

        let configured = tokio::select! {
            result = self.configure(&run_dir) => result,
            _ = shutdown.cancelled() => Err(BootError::Interrupted),
        };
        let mut server = match configured {
            Ok(server) => server,
            Err(e) => {
                warn!(target: "boot", stage = %self.stage, error = %e, "boot failed, stopping hypervisor");
                self.abort().await;
                return Err(e);
            }
        };
        self.advance(BootStage::Running);

        let outcome = tokio::select! {
            exit = self.hypervisor.wait() => Outcome::Exited(exit),
            err = server.stopped() => Outcome::FrameServerFailed(err),
            _ = shutdown.cancelled() => Outcome::Interrupted,
        };

        match outcome {
            Outcome::Exited(exit) => {
                self.advance(BootStage::Exited);
                if let Err(e) = server.shutdown().await {
                    warn!(target: "boot", error = %e, "frame server did not stop cleanly");
                }
                Ok(exit?)
            }
            Outcome::FrameServerFailed(err) => {
                self.abort().await;
                Err(BootError::FrameServer(err))
            }
            Outcome::Interrupted => {
                info!(target: "boot", "interrupted, stopping hypervisor");
                self.abort().await;
                if let Err(e) = server.shutdown().await {
                    warn!(target: "boot", error = %e, "frame server did not stop cleanly");
                }
                Err(BootError::Interrupted)
            }
        }
    }

    /// Everything between launch and a started instance.
    async fn configure(&mut self, run_dir: &RunDir) -> Result<FrameServerHandle, BootError> {
        let api_socket = run_dir.api_socket();
        let readiness = &self.config.readiness;

        if let Readiness::TimedOut { attempts } =
            wait_for_path(&api_socket, &readiness.backoff()).await
        {
            if readiness.fail_on_timeout {
                return Err(BootError::ReadinessTimeout {
                    path: api_socket,
                    attempts,
                });
            }
            warn!(target: "boot", socket = %api_socket.display(), attempts, "control socket missing, trying anyway");
        }
        self.advance(BootStage::ControlSocketReady);

        let mut client = FirecrackerClient::new(api_socket);
        if let Some(secs) = self.config.api_timeout_secs {
            client = client.with_timeout(Duration::from_secs(secs));
        }

        client
            .set_boot_source(&self.config.boot_source.to_api())
            .await
            .map_err(|source| BootError::ControlPlane {
                stage: BootStage::BootSourceSet,
                source,
            })?;
        self.advance(BootStage::BootSourceSet);

        let drive = &self.config.drive;
        client
            .add_drive(&drive.drive_id, &drive.to_api())
            .await
            .map_err(|source| BootError::ControlPlane {
                stage: BootStage::DriveSet,
                source,
            })?;
        self.advance(BootStage::DriveSet);

        let uds_path = run_dir.vsock_socket();
        client
            .set_vsock(&self.config.side_channel.to_api(&uds_path))
            .await
            .map_err(|source| BootError::ControlPlane {
                stage: BootStage::SideChannelSet,
                source,
            })?;
        self.advance(BootStage::SideChannelSet);

        // The guest may dial in as soon as it boots, so listen before starting
        let listener_path = vsock_listener_path(&uds_path, self.config.side_channel.port);
        let server = VsockFrameServer::bind(listener_path, &self.config.guest)?.spawn();
        self.advance(BootStage::FrameServerListening);

        if let Err(source) = client.put_action(&InstanceAction::InstanceStart).await {
            if let Err(e) = server.shutdown().await {
                warn!(target: "boot", error = %e, "frame server did not stop cleanly");
            }
            return Err(BootError::ControlPlane {
                stage: BootStage::InstanceStartSent,
                source,
            });
        }
        self.advance(BootStage::InstanceStartSent);

        Ok(server)
    }

    async fn abort(&mut self) {
        if let Err(e) = self.hypervisor.kill().await {
            warn!(target: "boot", error = %e, "failed to kill hypervisor");
        }
    }
}
