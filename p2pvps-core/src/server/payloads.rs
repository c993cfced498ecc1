use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::types::{AgentError, Credentials, LeaseExpiration, Result};

/// Registration response envelope.
///
/// `success` is optional and defaults to `true`; older servers only send
/// `clientData`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub client_data: Option<Value>,
}

fn default_success() -> bool {
    true
}

impl RegistrationResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| AgentError::ProtocolError(e.to_string()))
    }

    /// Extract the issued credentials, or say why there are none.
    pub fn into_credentials(self) -> Result<Credentials> {
        if !self.success {
            return Err(AgentError::ServerError {
                status: None,
                message: self.message.unwrap_or_else(|| "registration rejected".into()),
            });
        }
        let data = self.client_data.ok_or_else(|| AgentError::ServerError {
            status: None,
            message: "no credentials issued".into(),
        })?;
        serde_json::from_value(data)
            .map_err(|e| AgentError::ProtocolError(format!("clientData: {e}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct ExpirationResponse {
    #[serde(default)]
    pub expiration: Option<Value>,
}

impl ExpirationResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| AgentError::ProtocolError(e.to_string()))
    }

    pub fn into_expiration(self) -> Result<LeaseExpiration> {
        match self.expiration {
            None | Some(Value::Null) => Err(AgentError::DataMissing("expiration")),
            Some(value) => parse_timestamp(&value).map(LeaseExpiration),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DevicePublicResponse {
    #[serde(default)]
    pub collection: Option<Value>,
}

impl DevicePublicResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| AgentError::ProtocolError(e.to_string()))
    }

    pub fn into_collection(self) -> Result<Value> {
        match self.collection {
            None | Some(Value::Null) => Err(AgentError::DataMissing("collection")),
            Some(value) => Ok(value),
        }
    }
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AgentError::ProtocolError(format!("expiration {text:?}: {e}"))),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| AgentError::ProtocolError(format!("expiration {n} out of range"))),
        other => Err(AgentError::ProtocolError(format!("expiration has unexpected type: {other}"))),
    }
}
