use reqwest::Client;
use tracing::info;

use super::orchestrator::Orchestrator;
use crate::config::{AgentSettings, ConfigError, DeviceIdentity};
use crate::provisioning::{ArtifactWriter, ProvisioningPipeline, ScriptRunner};
use crate::server::RegistrationClient;

/// Assemble the production orchestrator for a loaded device identity.
///
/// This function:
/// - Points the registration client at the configured marketplace server
/// - Prepares the script runner, passing the sudo password through when present
/// - Loads the Dockerfile template override, if one is configured
/// - Rejects a zero expiration check interval
///
/// Nothing is sent to the server here; the first request happens on the
/// orchestrator's first registration step.
pub async fn initialize_agent(
    identity: DeviceIdentity,
    client: Client,
    settings: &AgentSettings,
) -> Result<Orchestrator<RegistrationClient, ScriptRunner>, ConfigError> {
    let server = RegistrationClient::for_device(client, &identity, settings.request_timeout);
    info!(server = server.base_url(), device_id = %identity.device_id, "marketplace server configured");

    let runner = ScriptRunner::new(&settings.scripts_dir).with_sudo_password(identity.sudo_password.clone());

    let mut artifacts = ArtifactWriter::new(&settings.output_dir, identity.clone());
    if let Some(path) = &settings.dockerfile_template {
        let template = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        info!(path = %path.display(), "using custom Dockerfile template");
        artifacts = artifacts.with_template(template);
    }

    let pipeline = ProvisioningPipeline::new(runner, artifacts);
    Orchestrator::new(identity, server, pipeline, settings.check_interval)
}
