//! Error types for beacon.

use thiserror::Error;

/// Result type alias for beacon.
pub type Result<T> = std::result::Result<T, BeaconError>;

/// Beacon error types.
#[derive(Error, Debug)]
pub enum BeaconError {
    /// The controller login exchange did not yield a session token.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No device in the controller's device list matched the gateway name.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A response body could not be parsed or lacked a required field.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// No record in the zone matched the configured name.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// The DNS provider refused or failed the change request.
    #[error("Provider rejected change: {0}")]
    ProviderRejected(String),

    /// The secondary provider call failed or echoed the wrong IP.
    #[error("Secondary notify failed: {0}")]
    SecondaryNotifyFailed(String),

    /// A network call exceeded its configured timeout.
    #[error("Transport timeout: {0}")]
    TransportTimeout(String),

    /// An HTTP endpoint answered with a status other than 200.
    #[error("Unexpected status from {endpoint}: {status}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// Scheduler lifecycle error.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for BeaconError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BeaconError::TransportTimeout(e.to_string())
        } else {
            BeaconError::Network(e.to_string())
        }
    }
}

impl From<toml::de::Error> for BeaconError {
    fn from(e: toml::de::Error) -> Self {
        BeaconError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for BeaconError {
    fn from(e: toml::ser::Error) -> Self {
        BeaconError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for BeaconError {
    fn from(e: serde_json::Error) -> Self {
        BeaconError::Serialization(e.to_string())
    }
}

impl From<cron::error::Error> for BeaconError {
    fn from(e: cron::error::Error) -> Self {
        BeaconError::Config(format!("invalid cron expression: {}", e))
    }
}
