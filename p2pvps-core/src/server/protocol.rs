use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, info};

use crate::config::{DeviceIdentity, AGENT_NAME, AGENT_VERSION};
use crate::server::{DevicePublicResponse, ExpirationResponse, RegistrationResponse};
use crate::types::{AgentError, Credentials, DeviceSpecs, LeaseExpiration, Result};
use crate::utils::get_user_agent;

/// Server-side operations the lifecycle depends on.
///
/// Implementations never retry; the orchestrator owns retry policy.
#[async_trait]
pub trait LeaseServer: Send + Sync {
    /// Register the device and obtain credentials for a new rental cycle.
    async fn register(&self, device_id: &str, specs: &DeviceSpecs) -> Result<Credentials>;

    /// Fetch the current lease expiration. Never cached.
    async fn get_expiration(&self, device_id: &str) -> Result<LeaseExpiration>;
}

/// HTTP client for the marketplace server
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RegistrationClient {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn for_device(client: Client, identity: &DeviceIdentity, timeout: Duration) -> Self {
        Self::new(client, identity.server_url(), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the public marketplace record for a device
    pub async fn get_device_public_model(&self, device_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/api/devicePublicData/{}", self.base_url, device_id);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", get_user_agent(AGENT_NAME, AGENT_VERSION))
            .timeout(self.timeout)
            .send()
            .await?;
        let body = success_body(response).await?;
        DevicePublicResponse::parse(&body)?.into_collection()
    }
}

#[async_trait]
impl LeaseServer for RegistrationClient {
    async fn register(&self, device_id: &str, specs: &DeviceSpecs) -> Result<Credentials> {
        let url = format!("{}/api/devicePublicData/{}/register", self.base_url, device_id);
        info!(%url, "registering device with marketplace server");

        let response = self
            .client
            .post(&url)
            .header("User-Agent", get_user_agent(AGENT_NAME, AGENT_VERSION))
            .timeout(self.timeout)
            .form(specs)
            .send()
            .await?;

        let body = success_body(response).await?;
        let credentials = RegistrationResponse::parse(&body)?.into_credentials()?;
        info!(username = %credentials.username, port = credentials.port, "registration accepted");
        Ok(credentials)
    }

    async fn get_expiration(&self, device_id: &str) -> Result<LeaseExpiration> {
        let url = format!("{}/api/getDeviceExpiration/{}", self.base_url, device_id);
        let response = self
            .client
            .get(&url)
            .header("User-Agent", get_user_agent(AGENT_NAME, AGENT_VERSION))
            .timeout(self.timeout)
            .send()
            .await?;

        let body = success_body(response).await?;
        let expiration = ExpirationResponse::parse(&body)?.into_expiration()?;
        debug!(%expiration, "expiration received");
        Ok(expiration)
    }
}

/// Body of a 2xx response; any other status is a [`AgentError::ServerError`].
async fn success_body(response: Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        if cfg!(debug_assertions) {
            debug!(%status, %body, "server returned error status");
        }
        return Err(AgentError::ServerError {
            status: Some(status.as_u16()),
            message: format!("HTTP {}", status),
        });
    }
    Ok(body)
}
