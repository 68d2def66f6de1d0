// ABOUTME: Cluster endpoint configuration handed over by the provisioning layer.
// ABOUTME: Parses unix://, tcp:// and http:// endpoints for the container engine API.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEndpoint {
    /// Local socket, e.g. `unix:///var/run/docker.sock`.
    Unix(PathBuf),
    /// Plain HTTP API address, e.g. `tcp://10.0.0.5:2375`.
    Http(String),
}

impl ClusterEndpoint {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("cluster endpoint cannot be empty".to_string());
        }

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err("unix endpoint needs a socket path".to_string());
            }
            return Ok(ClusterEndpoint::Unix(PathBuf::from(path)));
        }

        let address = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("http://"))
            .ok_or_else(|| format!("unsupported endpoint scheme: {}", s))?;

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| format!("endpoint needs host:port: {}", s))?;
        if host.is_empty() {
            return Err("endpoint host cannot be empty".to_string());
        }
        port.parse::<u16>()
            .map_err(|_| format!("invalid port: {}", port))?;

        Ok(ClusterEndpoint::Http(format!("http://{}", address)))
    }
}

impl Default for ClusterEndpoint {
    fn default() -> Self {
        ClusterEndpoint::Unix(PathBuf::from(DEFAULT_SOCKET))
    }
}

impl fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            ClusterEndpoint::Http(address) => f.write_str(address),
        }
    }
}

impl<'de> Deserialize<'de> for ClusterEndpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ClusterEndpoint::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub endpoint: ClusterEndpoint,

    /// Client-side timeout for a single API request.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoint: ClusterEndpoint::default(),
            timeout: default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_socket() {
        assert_eq!(
            ClusterEndpoint::parse("unix:///run/user/1000/podman/podman.sock").unwrap(),
            ClusterEndpoint::Unix(PathBuf::from("/run/user/1000/podman/podman.sock"))
        );
    }

    #[test]
    fn tcp_becomes_http() {
        assert_eq!(
            ClusterEndpoint::parse("tcp://10.0.0.5:2375").unwrap(),
            ClusterEndpoint::Http("http://10.0.0.5:2375".to_string())
        );
    }

    #[test]
    fn rejects_unknown_scheme_and_bad_port() {
        assert!(ClusterEndpoint::parse("ssh://host").is_err());
        assert!(ClusterEndpoint::parse("tcp://host:http").is_err());
        assert!(ClusterEndpoint::parse("unix://").is_err());
    }
}
