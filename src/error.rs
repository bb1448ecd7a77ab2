//! replinit Error Types

use thiserror::Error;

/// Result type alias for replinit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server error code: replica set has no configuration yet
pub const CODE_NOT_YET_INITIALIZED: i32 = 94;

/// Server error code: replica set was already initiated
pub const CODE_ALREADY_INITIALIZED: i32 = 23;

/// Server error code: mongod was started without `--replSet`
pub const CODE_NO_REPLICATION_ENABLED: i32 = 76;

/// replinit error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid replica set topology: {0}")]
    InvalidTopology(String),

    // Replica set errors
    #[error("Replica set is not initiated")]
    NotInitiated,

    #[error("Replica set is already initiated")]
    AlreadyInitiated,

    #[error("Replication is not enabled on {0} (was mongod started with --replSet?)")]
    ReplicationDisabled(String),

    // Node errors
    #[error("Connection failed to {address}: {reason}")]
    Connectivity { address: String, reason: String },

    #[error("Command failed with code {code} ({name}): {message}")]
    Command { code: i32, name: String, message: String },

    #[error("Driver error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("Malformed server response: {0}")]
    MalformedResponse(String),

    #[error("Node {address} did not become primary within {waited_secs}s")]
    PrimaryTimeout { address: String, waited_secs: u64 },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity { .. })
    }

    /// Check if this error means the node has no replica set config yet
    pub fn is_not_initiated(&self) -> bool {
        matches!(self, Error::NotInitiated)
    }

    /// Map a server command error code to the matching error kind
    pub fn from_command(address: &str, code: i32, name: &str, message: &str) -> Self {
        match code {
            CODE_NOT_YET_INITIALIZED => Error::NotInitiated,
            CODE_ALREADY_INITIALIZED => Error::AlreadyInitiated,
            CODE_NO_REPLICATION_ENABLED => Error::ReplicationDisabled(address.to_string()),
            _ => Error::Command {
                code,
                name: name.to_string(),
                message: message.to_string(),
            },
        }
    }
}
