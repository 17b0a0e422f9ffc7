use std::path::Path;
use tracing::{debug, info, warn};

use super::{wait_until, Backoff, Readiness};

/// Wait for `path` to appear on the filesystem (e.g. a socket created by a
/// process that is still starting up).
pub async fn wait_for_path(path: &Path, backoff: &Backoff) -> Readiness {
    info!(target: "readiness", path = %path.display(), max_attempts = backoff.max_attempts, "waiting for path");

    let mut attempt = 0;
    let outcome = wait_until(backoff, || {
        attempt += 1;
        debug!(target: "readiness", path = %path.display(), "check {}/{}", attempt, backoff.max_attempts);
        path.exists()
    })
    .await;

    match outcome {
        Readiness::Ready { attempts } => {
            info!(target: "readiness", path = %path.display(), attempts, "path appeared");
        }
        Readiness::TimedOut { attempts } => {
            warn!(target: "readiness", path = %path.display(), attempts, "path did not appear");
        }
    }

    outcome
}
