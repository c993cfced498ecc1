pub mod artifacts;
pub mod pipeline;
pub mod runner;
pub mod types;

// Re-export commonly used types and functions
pub use artifacts::*;
pub use pipeline::*;
pub use runner::*;
pub use types::*;
