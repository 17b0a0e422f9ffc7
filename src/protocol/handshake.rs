use serde::{Deserialize, Serialize};

use super::frame::{Frame, Tag};

/// What the guest should exec on the host's behalf.
///
/// Sent as the JSON payload of the `HELO` response frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuestCommand {
    pub argv: Vec<String>,
    /// `KEY=VALUE` entries
    pub envp: Vec<String>,
}

impl Default for GuestCommand {
    fn default() -> Self {
        Self {
            argv: to_strings(&["/usr/local/bin/docker-entrypoint.sh", "ps", "aux"]),
            envp: to_strings(&[
                "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
                "LANG=en_US.utf8",
                "PG_MAJOR=16",
                "PG_VERSION=16.1",
                "PG_SHA256=ce3c4d85d19b0121fe0d3f8ef1fa601f71989e86f8a66f7dc3ad546dd5564fec",
                "DOCKER_PG_LLVM_DEPS=llvm15-dev \t\tclang15",
                "PGDATA=/var/lib/postgresql/data",
                "POSTGRES_HOST_AUTH_METHOD=trust",
            ]),
        }
    }
}

impl GuestCommand {
    /// Build the `HELO` response frame carrying this command
    pub fn to_frame(&self) -> serde_json::Result<Frame> {
        Ok(Frame::new(Tag::HELO, serde_json::to_vec(self)?))
    }

    /// Parse the payload of a `HELO` response
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
