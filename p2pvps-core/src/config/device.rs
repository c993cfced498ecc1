use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::types::de_port;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid device config: {0}")]
    Invalid(String),
}

/// Device identity record (`device-config.json`).
///
/// Loaded once at startup and immutable for the life of the process.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    pub server_ip: String,
    #[serde(deserialize_with = "de_port")]
    pub server_port: u16,
    #[serde(default)]
    pub ssh_server: String,
    #[serde(deserialize_with = "de_port")]
    pub ssh_server_port: u16,
    /// Local privilege escalation password for the storage-prep step.
    #[serde(default)]
    pub sudo_password: Option<String>,
}

impl DeviceIdentity {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let identity: DeviceIdentity =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        identity.validate()?;
        Ok(identity)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid("deviceId is empty".into()));
        }
        let host = self.server_host();
        if host.is_empty() {
            return Err(ConfigError::Invalid("serverIp is empty".into()));
        }
        if host.contains(['/', '?', '#']) {
            return Err(ConfigError::Invalid(format!("serverIp {host:?} must be a bare host, without a path")));
        }
        let has_port = match host.strip_prefix('[') {
            Some(bracketed) => !bracketed.ends_with(']'),
            None => host.contains(':'),
        };
        if has_port {
            return Err(ConfigError::Invalid(format!(
                "serverIp {host:?} must not carry a port, use serverPort"
            )));
        }
        if self.server_port == 0 {
            return Err(ConfigError::Invalid("serverPort must be non-zero".into()));
        }
        Ok(())
    }

    /// Base URL of the marketplace server, `http://` unless a scheme is given.
    pub fn server_url(&self) -> String {
        format!("{}://{}:{}", self.server_scheme(), self.server_host(), self.server_port)
    }

    fn server_scheme(&self) -> &'static str {
        if self.server_ip.trim().starts_with("https://") {
            "https"
        } else {
            "http"
        }
    }

    /// `serverIp` without its scheme or trailing slashes.
    fn server_host(&self) -> &str {
        let ip = self.server_ip.trim();
        ip.strip_prefix("https://")
            .or_else(|| ip.strip_prefix("http://"))
            .unwrap_or(ip)
            .trim_end_matches('/')
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("server_ip", &self.server_ip)
            .field("server_port", &self.server_port)
            .field("ssh_server", &self.ssh_server)
            .field("ssh_server_port", &self.ssh_server_port)
            .field("sudo_password", &self.sudo_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
