use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// Re-export Result type for convenience
pub use crate::error::{AgentError, Result};

/// Login issued by the marketplace for one rental cycle
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(deserialize_with = "de_port")]
    pub port: u16,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Capability snapshot sent to the server with each registration.
///
/// Built fresh for every attempt by [`DeviceSpecs::snapshot`](crate::utils::system)
/// and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpecs {
    pub memory: String,
    pub disk_space: String,
    pub processor: String,
    pub internet_speed: String,
    pub checkin_time_stamp: String,
}

/// End of the current lease, as reported by the server on one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LeaseExpiration(pub DateTime<Utc>);

impl LeaseExpiration {
    /// True only when the lease ended strictly before `now`.
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        self.0 < now
    }
}

impl fmt::Display for LeaseExpiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Ports show up both as JSON numbers and as numeric strings.
pub(crate) fn de_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port {text:?}"))),
    }
}
