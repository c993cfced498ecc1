use std::fmt;

use serde::Serialize;

/// Phase of the device lifecycle. Exactly one per running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unregistered,
    Registering,
    Provisioning,
    Active,
    CheckingExpiration,
    Deprovisioning,
    FatalFailure,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unregistered => "unregistered",
            LifecycleState::Registering => "registering",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Active => "active",
            LifecycleState::CheckingExpiration => "checking_expiration",
            LifecycleState::Deprovisioning => "deprovisioning",
            LifecycleState::FatalFailure => "fatal_failure",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator publishes after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSnapshot {
    pub state: LifecycleState,
    pub timer_armed: bool,
}
