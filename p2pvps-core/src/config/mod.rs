mod constants;
mod device;
mod settings;

pub use constants::*;
pub use device::{ConfigError, DeviceIdentity};
pub use settings::AgentSettings;
