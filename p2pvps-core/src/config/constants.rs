// P2P VPS Client Configuration Constants

/// Agent name, sent as the HTTP user agent
pub const AGENT_NAME: &str = "p2pvps-client";

/// Agent version string
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Device identity file read at startup
pub const DEFAULT_CONFIG_PATH: &str = "device-config.json";

/// Where the Dockerfile and config.json are written
pub const DEFAULT_OUTPUT_DIR: &str = "output-files";

/// Directory holding the storage/image scripts
pub const DEFAULT_SCRIPTS_DIR: &str = "lib";

/// Interval between lease expiration checks in seconds
pub const CHECK_EXPIRATION_INTERVAL_SECS: u64 = 120;

/// Per-request timeout for marketplace server calls
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Port of the local status listener
pub const DEFAULT_STATUS_PORT: u16 = 4000;
