// Common test utilities for vmrun integration tests
#![allow(dead_code)]

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use hyperlocal::UnixServerExt;
use std::convert::Infallible;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use vmrun::config::BootConfig;
use vmrun::error::{LaunchError, WaitError};
use vmrun::firecracker::Hypervisor;
use vmrun::paths::vsock_listener_path;
use vmrun::protocol::{read_frame, GuestCommand, Tag};

/// One request as seen by the fake control plane
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

/// What the fake hypervisor observed during a run
#[derive(Default)]
pub struct FakeState {
    pub api_socket: Mutex<Option<PathBuf>>,
    pub requests: Mutex<Vec<Recorded>>,
    pub guest_received: Mutex<Option<GuestCommand>>,
    pub killed: AtomicBool,
    /// When `start` was called and when the first API request arrived
    pub started_at: Mutex<Option<Instant>>,
    pub first_request_at: Mutex<Option<Instant>>,
    guest_done: Mutex<Option<oneshot::Sender<bool>>>,
}

impl FakeState {
    pub fn paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.path.clone())
            .collect()
    }

    pub fn request(&self, path: &str) -> Option<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.path == path)
            .cloned()
    }

    /// Time from launch to the first control-plane request
    pub fn time_to_first_request(&self) -> Option<Duration> {
        let started = (*self.started_at.lock().unwrap())?;
        let first = (*self.first_request_at.lock().unwrap())?;
        Some(first - started)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// Stands in for Firecracker: serves the control API on the requested
/// socket and, once the instance is started, plays the guest agent by
/// dialing the vsock listener and sending `HELO`.
pub struct FakeHypervisor {
    pub state: Arc<FakeState>,
    /// Delay before the API socket appears
    pub bind_delay: Duration,
    /// Never bind the API socket at all
    pub never_bind: bool,
    /// Answer this path with 400
    pub fail_path: Option<String>,
    /// Port the fake guest dials
    pub vsock_port: u32,
    /// Exit once the guest has its command; otherwise run until killed
    pub exit_after_guest: bool,
    server: Option<JoinHandle<()>>,
    exited: Option<oneshot::Receiver<bool>>,
}

/// Default readiness checks land at 0, 10, 30, 70ms; binding at 25ms means
/// the third check is the first to find the socket
pub const THIRD_CHECK_BIND_DELAY: Duration = Duration::from_millis(25);

impl FakeHypervisor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FakeState::default()),
            bind_delay: THIRD_CHECK_BIND_DELAY,
            never_bind: false,
            fail_path: None,
            vsock_port: 1,
            exit_after_guest: true,
            server: None,
            exited: None,
        }
    }
}

#[async_trait::async_trait]
impl Hypervisor for FakeHypervisor {
    async fn start(&mut self, api_socket: &Path) -> Result<(), LaunchError> {
        if self.server.is_some() {
            return Err(LaunchError::AlreadyStarted);
        }
        *self.state.api_socket.lock().unwrap() = Some(api_socket.to_path_buf());
        *self.state.started_at.lock().unwrap() = Some(Instant::now());

        let (tx, rx) = oneshot::channel();
        *self.state.guest_done.lock().unwrap() = Some(tx);
        self.exited = Some(rx);

        let state = Arc::clone(&self.state);
        let path = api_socket.to_path_buf();
        let delay = self.bind_delay;
        let never_bind = self.never_bind;
        let fail_path = self.fail_path.clone();
        let port = self.vsock_port;

        self.server = Some(tokio::spawn(async move {
            if never_bind {
                return std::future::pending().await;
            }
            tokio::time::sleep(delay).await;
            serve_api(path, state, fail_path, port).await;
        }));
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus, WaitError> {
        let exited = self.exited.take().ok_or(WaitError::NotRunning)?;
        if !self.exit_after_guest {
            std::future::pending::<()>().await;
        }
        let guest_ok = exited.await.unwrap_or(false);
        if let Some(server) = self.server.take() {
            server.abort();
        }
        if guest_ok {
            Ok(ExitStatus::from_raw(0))
        } else {
            Err(WaitError::Exit(ExitStatus::from_raw(1 << 8)))
        }
    }

    async fn kill(&mut self) -> Result<(), WaitError> {
        self.state.killed.store(true, Ordering::SeqCst);
        if let Some(server) = self.server.take() {
            server.abort();
        }
        Ok(())
    }
}

async fn serve_api(path: PathBuf, state: Arc<FakeState>, fail_path: Option<String>, port: u32) {
    let make_svc = make_service_fn(move |_| {
        let state = Arc::clone(&state);
        let fail_path = fail_path.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle_api(req, Arc::clone(&state), fail_path.clone(), port)
            }))
        }
    });

    let server = Server::bind_unix(&path)
        .expect("bind fake API socket")
        .serve(make_svc);
    let _ = server.await;
}

async fn handle_api(
    req: Request<Body>,
    state: Arc<FakeState>,
    fail_path: Option<String>,
    port: u32,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

    state
        .first_request_at
        .lock()
        .unwrap()
        .get_or_insert_with(Instant::now);
    state.requests.lock().unwrap().push(Recorded {
        method,
        path: path.clone(),
        body: body.clone(),
    });

    if fail_path.as_deref() == Some(path.as_str()) {
        let fault = serde_json::json!({"fault_message": format!("rejected {}", path)});
        let resp = Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from(fault.to_string()))
            .unwrap();
        return Ok(resp);
    }

    if path == "/actions" && body["action_type"] == "InstanceStart" {
        let uds_path = state
            .request("/vsock")
            .and_then(|r| r.body["uds_path"].as_str().map(PathBuf::from));
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let ok = match uds_path {
                Some(uds) => run_guest(&vsock_listener_path(&uds, port), &state).await,
                None => false,
            };
            if let Some(tx) = state.guest_done.lock().unwrap().take() {
                let _ = tx.send(ok);
            }
        });
    }

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .unwrap())
}

/// Guest side of the handshake: `HELO` with no payload, then read the reply.
async fn run_guest(listener: &Path, state: &FakeState) -> bool {
    let command = match request_command(listener).await {
        Some(command) => command,
        None => return false,
    };
    *state.guest_received.lock().unwrap() = Some(command);
    true
}

/// Connect to a frame server, send `HELO`, and decode the command it returns
pub async fn request_command(listener: &Path) -> Option<GuestCommand> {
    let mut stream = UnixStream::connect(listener).await.ok()?;
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(b"HELO");
    stream.write_all(&header).await.ok()?;

    let frame = read_frame(&mut stream).await.ok()??;
    if frame.tag != Tag::HELO {
        return None;
    }
    GuestCommand::from_payload(&frame.payload).ok()
}

/// Config pointing at fake images, with a small recognisable guest command
pub fn test_config() -> BootConfig {
    let mut config = BootConfig::default();
    config.boot_source.kernel_image_path = PathBuf::from("/images/vmlinux");
    config.boot_source.initrd_path = Some(PathBuf::from("/images/initrd.cpio"));
    config.drive.path_on_host = PathBuf::from("/images/rootfs.erofs");
    config.guest = GuestCommand {
        argv: vec!["/bin/echo".to_string(), "booted".to_string()],
        envp: vec!["HOME=/root".to_string(), "TERM=dumb".to_string()],
    };
    config
}

/// Initialize tracing once for a test binary; RUST_LOG controls output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
