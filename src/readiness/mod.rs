pub mod socket;

pub use socket::wait_for_path;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Readiness polling policy, as it appears in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Number of existence checks before giving up
    pub max_attempts: u32,
    /// Delay after the first failed check
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after every failed check
    pub backoff_factor: u32,
    /// Abort the run when the socket never appears instead of carrying on
    pub fail_on_timeout: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 10,
            backoff_factor: 2,
            fail_on_timeout: false,
        }
    }
}

impl ReadinessConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            factor: self.backoff_factor,
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Backoff {
    /// Sleep after failed attempt `attempt` (zero-based): `initial * factor^attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(self.factor.saturating_pow(attempt))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        ReadinessConfig::default().backoff()
    }
}

/// Outcome of a bounded readiness poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The condition held on check number `attempts`
    Ready { attempts: u32 },
    /// Every check failed
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            Readiness::Ready { attempts } | Readiness::TimedOut { attempts } => attempts,
        }
    }
}

/// Poll `probe` until it returns true or the attempts run out.
///
/// Sleeps only between checks, never after the last one. Exhaustion is
/// reported as `Readiness::TimedOut`, not as an error; callers decide.
pub async fn wait_until<F>(backoff: &Backoff, mut probe: F) -> Readiness
where
    F: FnMut() -> bool,
{
    for attempt in 0..backoff.max_attempts {
        if probe() {
            return Readiness::Ready {
                attempts: attempt + 1,
            };
        }
        if attempt + 1 < backoff.max_attempts {
            sleep(backoff.delay(attempt)).await;
        }
    }

    Readiness::TimedOut {
        attempts: backoff.max_attempts,
    }
}
