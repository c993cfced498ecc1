//! Marketplace server contract
//!
//! Wire payloads and the HTTP client used to register the device and poll
//! its lease expiration.

pub mod payloads;
pub mod protocol;

// Re-export commonly used types
pub use payloads::*;
pub use protocol::*;
