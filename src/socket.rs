use thiserror::Error;

/// Default TCP port for the overlay service
pub const DEFAULT_PORT: u16 = 30000;

/// Default TCP port of the external sensor telemetry socket
pub const DEFAULT_SENSOR_PORT: u16 = 30001;

/// Default host used by clients connecting to the service
pub const DEFAULT_HOST: &str = "localhost";

/// Fixed reconnect/poll cadence used throughout the system
pub const RETRY_INTERVAL_MS: u64 = 1000;

/// Socket error types
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Socket connection error: {0}")]
    Connection(String),
    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
