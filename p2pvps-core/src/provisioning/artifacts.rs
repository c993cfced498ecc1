use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::DeviceIdentity;
use crate::types::{AgentError, Credentials, Result};

/// Built-in container build descriptor. `{{username}}`, `{{password}}` and
/// `{{port}}` are substituted with the credentials of the current cycle.
pub const DEFAULT_DOCKERFILE_TEMPLATE: &str = r#"FROM ubuntu:16.04
RUN apt-get -y update && apt-get install -y openssh-server sudo curl nano
RUN mkdir /var/run/sshd
RUN sed 's@session\s*required\s*pam_loginuid.so@session optional pam_loginuid.so@g' -i /etc/pam.d/sshd
WORKDIR /root
COPY config.json config.json
VOLUME /media/storage
RUN useradd -ms /bin/bash {{username}}
RUN echo {{username}}:{{password}} | chpasswd
RUN adduser {{username}} sudo
RUN chown -R {{username}} /media/storage
EXPOSE {{port}}
CMD ["/usr/sbin/sshd", "-D"]
"#;

/// `config.json` consumed by the workload's reverse tunnel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig<'a> {
    pub device_id: &'a str,
    pub server_ip: &'a str,
    pub server_port: u16,
    pub ssh_server: &'a str,
    pub ssh_server_port: u16,
    pub ssh_tunnel_port: u16,
}

/// Writes the per-cycle configuration artifacts to a fixed output directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    identity: DeviceIdentity,
    dockerfile_template: String,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>, identity: DeviceIdentity) -> Self {
        Self {
            output_dir: output_dir.into(),
            identity,
            dockerfile_template: DEFAULT_DOCKERFILE_TEMPLATE.to_string(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.dockerfile_template = template.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn dockerfile_path(&self) -> PathBuf {
        self.output_dir.join("Dockerfile")
    }

    pub fn config_path(&self) -> PathBuf {
        self.output_dir.join("config.json")
    }

    /// Write the Dockerfile, then config.json. Overwrites any earlier cycle's files.
    pub async fn write_all(&self, credentials: &Credentials) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| AgentError::ConfigWriteFailed { path: self.output_dir.clone(), source })?;

        let dockerfile = render_dockerfile(&self.dockerfile_template, credentials);
        write_file(&self.dockerfile_path(), dockerfile.as_bytes()).await?;
        info!(path = %self.dockerfile_path().display(), "Dockerfile written");

        let config = ClientConfig {
            device_id: &self.identity.device_id,
            server_ip: &self.identity.server_ip,
            server_port: self.identity.server_port,
            ssh_server: &self.identity.ssh_server,
            ssh_server_port: self.identity.ssh_server_port,
            ssh_tunnel_port: credentials.port,
        };
        let json = serde_json::to_vec_pretty(&config).map_err(|e| AgentError::ConfigWriteFailed {
            path: self.config_path(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        write_file(&self.config_path(), &json).await?;
        info!(path = %self.config_path().display(), "config.json written");
        Ok(())
    }
}

pub fn render_dockerfile(template: &str, credentials: &Credentials) -> String {
    template
        .replace("{{username}}", &credentials.username)
        .replace("{{password}}", &credentials.password)
        .replace("{{port}}", &credentials.port.to_string())
}

async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| AgentError::ConfigWriteFailed { path: path.to_path_buf(), source })
}
