use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::constants::*;

/// Runtime knobs that are not part of the device identity.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
    pub scripts_dir: PathBuf,
    /// Period of the lease expiration timer.
    pub check_interval: Duration,
    pub request_timeout: Duration,
    /// `None` disables the local status listener.
    pub status_addr: Option<SocketAddr>,
    /// Replaces the built-in Dockerfile template when set.
    pub dockerfile_template: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            scripts_dir: PathBuf::from(DEFAULT_SCRIPTS_DIR),
            check_interval: Duration::from_secs(CHECK_EXPIRATION_INTERVAL_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            status_addr: Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_STATUS_PORT))),
            dockerfile_template: None,
        }
    }
}
