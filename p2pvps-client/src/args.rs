//! CLI argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::logfile::DEFAULT_MAX_LOG_BYTES;
use p2pvps_core::config::{
    AgentSettings, CHECK_EXPIRATION_INTERVAL_SECS, DEFAULT_CONFIG_PATH, DEFAULT_OUTPUT_DIR,
    DEFAULT_SCRIPTS_DIR, DEFAULT_STATUS_PORT, REQUEST_TIMEOUT_SECS,
};

/// Device client for the P2P VPS marketplace.
#[derive(Parser, Debug)]
#[command(name = "p2pvps-client", version)]
pub struct Args {
    /// Device identity file
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Directory the Dockerfile and config.json are written to
    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Directory holding the provisioning and teardown scripts
    #[arg(long, value_name = "DIR", default_value = DEFAULT_SCRIPTS_DIR)]
    pub scripts_dir: PathBuf,

    /// Seconds between lease expiration checks
    #[arg(long, default_value_t = CHECK_EXPIRATION_INTERVAL_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub check_interval_secs: u64,

    /// Per-request timeout for marketplace calls, in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout_secs: u64,

    /// Port of the local status listener (0 disables it)
    #[arg(long, default_value_t = DEFAULT_STATUS_PORT)]
    pub status_port: u16,

    /// Replace the built-in Dockerfile template
    #[arg(long, value_name = "PATH")]
    pub dockerfile_template: Option<PathBuf>,

    /// Append logs to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Size at which the log file is rotated to `<PATH>.1`
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_LOG_BYTES,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub log_max_bytes: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register, provision and keep the device rented (default)
    Run,
    /// Print the marketplace's public record for this device and exit
    ShowDevice,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn settings(&self) -> AgentSettings {
        AgentSettings {
            config_path: self.config.clone(),
            output_dir: self.output_dir.clone(),
            scripts_dir: self.scripts_dir.clone(),
            check_interval: Duration::from_secs(self.check_interval_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            status_addr: (self.status_port != 0)
                .then(|| SocketAddr::from(([0, 0, 0, 0], self.status_port))),
            dockerfile_template: self.dockerfile_template.clone(),
        }
    }
}
