//! Docker daemon address parsing

use skydock_core::RuntimeError;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Where the Docker daemon listens
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DockerHost {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerHost {
    /// Parse a `DOCKER_HOST` style address: `unix:///path` or `tcp://host:port`
    pub fn parse(address: &str) -> Result<Self, RuntimeError> {
        let address = address.trim();
        if let Some(path) = address.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(RuntimeError::InvalidEndpoint(address.to_string()));
            }
            return Ok(DockerHost::Unix(PathBuf::from(path)));
        }

        let authority = address
            .strip_prefix("tcp://")
            .or_else(|| address.strip_prefix("http://"))
            .ok_or_else(|| RuntimeError::InvalidEndpoint(address.to_string()))?
            .trim_end_matches('/');

        if authority.is_empty() || !authority.contains(':') {
            return Err(RuntimeError::InvalidEndpoint(address.to_string()));
        }
        Ok(DockerHost::Tcp(authority.to_string()))
    }
}

impl Default for DockerHost {
    fn default() -> Self {
        DockerHost::Unix(PathBuf::from("/var/run/docker.sock"))
    }
}

impl fmt::Display for DockerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerHost::Unix(path) => write!(f, "unix://{}", path.display()),
            DockerHost::Tcp(authority) => write!(f, "tcp://{}", authority),
        }
    }
}
