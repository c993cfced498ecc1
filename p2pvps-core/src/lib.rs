//! Device-side client for a peer-to-peer VPS rental marketplace.
//!
//! The device registers with the marketplace server, builds and runs a
//! rentable container from the issued credentials, then polls the lease
//! expiration until the rental ends and the cycle starts over.

pub mod agent;
pub mod config;
pub mod error;
pub mod provisioning;
pub mod server;
pub mod status;
pub mod types;
pub mod utils;
