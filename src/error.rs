//! Error types for each stage of a run.
//!
//! Messages describe the failing operation only; the underlying cause is
//! chained as `source` so `{:#}` prints the whole story once.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use crate::bootstrap::BootStage;

/// The hypervisor process could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("spawning {}", .bin.display())]
    Spawn {
        bin: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hypervisor already started")]
    AlreadyStarted,
}

/// The hypervisor process could not be awaited, or exited abnormally.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("hypervisor process not running")]
    NotRunning,

    #[error("waiting for hypervisor process")]
    Io(#[source] io::Error),

    #[error("hypervisor exited with {0}")]
    Exit(ExitStatus),
}

/// A configuration or action request to the control plane failed.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("encoding body for PUT {path}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("building request PUT {path}")]
    Request {
        path: String,
        #[source]
        source: hyper::http::Error,
    },

    #[error("PUT {path} failed")]
    Transport {
        path: String,
        #[source]
        source: hyper::Error,
    },

    #[error("drive id {drive_id:?} must be non-empty and only contain [A-Za-z0-9_]")]
    InvalidDriveId { drive_id: String },

    #[error("PUT {path} timed out after {after:?}")]
    Timeout { path: String, after: Duration },

    #[error("PUT {path} returned {status}: {body}")]
    Status {
        path: String,
        status: hyper::StatusCode,
        body: String,
    },
}

/// Wire-level failure on one side-channel connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("short frame header: got {got} of 8 bytes")]
    ShortHeader { got: usize },

    #[error("short frame payload: got {got} of {expected} bytes")]
    ShortPayload { expected: usize, got: usize },

    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("side channel I/O")]
    Io(#[from] io::Error),
}

/// The side-channel listener could not be set up or stopped accepting.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("binding side channel listener {}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("accepting side channel connection")]
    Accept(#[source] io::Error),

    #[error("encoding handshake response")]
    Handshake(#[source] serde_json::Error),

    #[error("framing handshake response")]
    ReplyFrame(#[source] FrameError),

    #[error("frame server stopped unexpectedly")]
    Stopped,

    #[error("frame server task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Fatal error for a whole run, naming the step that failed.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("creating run directory")]
    RunDir(#[source] io::Error),

    #[error("launching hypervisor")]
    Launch(#[from] LaunchError),

    #[error("control socket {} did not appear after {attempts} checks", .path.display())]
    ReadinessTimeout { path: PathBuf, attempts: u32 },

    #[error("{}", .stage.action())]
    ControlPlane {
        stage: BootStage,
        #[source]
        source: ControlPlaneError,
    },

    #[error("side channel frame server")]
    FrameServer(#[from] ListenError),

    #[error("awaiting hypervisor exit")]
    Wait(#[from] WaitError),

    #[error("interrupted")]
    Interrupted,
}
