//! Device lifecycle management
//!
//! This module drives the unattended rental cycle of the device:
//! - Registration with the marketplace server
//! - Provisioning of the rented workload
//! - Periodic lease expiration checks
//! - Teardown and re-registration when the lease ends

mod heartbeat;
mod orchestrator;
mod startup;
mod state;

pub use heartbeat::ExpirationTimer;
pub use orchestrator::Orchestrator;
pub use startup::initialize_agent;
pub use state::{LifecycleSnapshot, LifecycleState};
